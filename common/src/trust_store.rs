/*++

Licensed under the Apache-2.0 license.

File Name:

    trust_store.rs

Abstract:

    Compiled-in vendor configuration and the per-pass snapshot of persisted
    trust lists, revocation override and policy flags.

--*/

use alloc::string::String;
use alloc::vec::Vec;

use bootgate_drivers::persistent::{
    decode_policy_word, is_der_certificate, RevocationList, TrustEntry, TrustList,
};
use bootgate_drivers::{cprintln, VariableName, VariableStore};
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_verify::{
    AnchorCategory, AnchorId, AnchorOrigin, PolicyFlags, RevocationPolicy, TrustAnchor,
    TrustAnchors, TrustSnapshot,
};

/// Revocation baseline used when the vendor does not supply one
pub const DEFAULT_SBAT_BASELINE: &str = "sbat,1,2021030218\n";

/// Trust material built into the boot gate
#[derive(Debug, Clone)]
pub struct VendorConfig {
    /// Distribution vendor root certificate (DER)
    pub vendor_root_cert: Option<Vec<u8>>,

    /// Embedded fallback root certificate (DER)
    pub fallback_root_cert: Option<Vec<u8>>,

    /// Compiled deny list
    pub vendor_deny: Vec<TrustEntry>,

    /// Compiled allow list
    pub vendor_allow: Vec<TrustEntry>,

    /// Compiled revocation baseline, `name,generation[,comment]` lines
    pub sbat_baseline: String,
}

impl Default for VendorConfig {
    fn default() -> Self {
        Self {
            vendor_root_cert: None,
            fallback_root_cert: None,
            vendor_deny: Vec::new(),
            vendor_allow: Vec::new(),
            sbat_baseline: String::from(DEFAULT_SBAT_BASELINE),
        }
    }
}

impl VendorConfig {
    /// Parse the compiled revocation baseline
    pub fn revocation_baseline(&self) -> BootGateResult<RevocationPolicy> {
        RevocationPolicy::from_text(&self.sbat_baseline)
    }

    fn root_anchor(
        id: AnchorId,
        category: AnchorCategory,
        cert: &Option<Vec<u8>>,
    ) -> BootGateResult<TrustAnchor> {
        let entries = match cert {
            Some(cert) if !is_der_certificate(cert) => {
                return Err(BootGateError::PERSIST_TRUST_LIST_CERT_NOT_DER)
            }
            Some(cert) => alloc::vec![TrustEntry::X509(cert.clone())],
            None => Vec::new(),
        };
        Ok(TrustAnchor::new(
            id,
            category,
            AnchorOrigin::CompiledIn,
            entries,
        ))
    }
}

/// Read a variable the snapshot depends on
fn read_variable(store: &dyn VariableStore, name: VariableName) -> BootGateResult<Option<Vec<u8>>> {
    store.get_persisted_variable(name).map_err(|err| {
        if err == BootGateError::VARIABLE_ATTRIBUTES_INVALID {
            cprintln!("[trust] Variable {} has unexpected attributes", name.as_str());
        }
        err
    })
}

/// Read and decode one trust list variable. A missing variable is an empty
/// list.
fn read_trust_list(store: &dyn VariableStore, name: VariableName) -> BootGateResult<TrustList> {
    match read_variable(store, name)? {
        Some(blob) => TrustList::decode(&blob).map_err(|err| {
            cprintln!("[trust] Variable {} is malformed", name.as_str());
            err
        }),
        None => Ok(TrustList::default()),
    }
}

fn variable_anchor(
    store: &dyn VariableStore,
    name: VariableName,
    id: AnchorId,
    category: AnchorCategory,
    origin: AnchorOrigin,
) -> BootGateResult<TrustAnchor> {
    let list = read_trust_list(store, name)?;
    Ok(TrustAnchor::new(id, category, origin, list.entries))
}

fn read_policy_flags(store: &dyn VariableStore) -> BootGateResult<PolicyFlags> {
    match read_variable(store, VariableName::PolicyFlags)? {
        Some(blob) => PolicyFlags::from_bits(decode_policy_word(&blob)?)
            .ok_or(BootGateError::PERSIST_POLICY_FLAGS_INVALID),
        None => Ok(PolicyFlags::empty()),
    }
}

fn read_revocation_policy(
    store: &dyn VariableStore,
    vendor: &VendorConfig,
) -> BootGateResult<RevocationPolicy> {
    let mut policy = vendor.revocation_baseline()?;
    if let Some(blob) = read_variable(store, VariableName::SbatLevel)? {
        policy.merge_override(&RevocationList::decode(&blob)?);
    }
    Ok(policy)
}

/// Take the snapshot used by one verification pass.
///
/// # Arguments
///
/// * `store` - Persisted variable service
/// * `vendor` - Compiled-in trust material
///
/// # Returns
///
/// Anchors ordered deny lists first, then allow lists, then roots. Any read
/// failure or undecodable variable is an error; nothing is skipped.
pub fn load_trust_snapshot(
    store: &dyn VariableStore,
    vendor: &VendorConfig,
) -> BootGateResult<TrustSnapshot> {
    let flags = read_policy_flags(store)?;

    let anchors = alloc::vec![
        TrustAnchor::new(
            AnchorId::VendorDenyList,
            AnchorCategory::DenyList,
            AnchorOrigin::CompiledIn,
            vendor.vendor_deny.clone(),
        ),
        variable_anchor(
            store,
            VariableName::PlatformDbx,
            AnchorId::PlatformDbx,
            AnchorCategory::DenyList,
            AnchorOrigin::PlatformVariable,
        )?,
        variable_anchor(
            store,
            VariableName::MokListX,
            AnchorId::MachineOwnerDenyList,
            AnchorCategory::DenyList,
            AnchorOrigin::MachineOwnerVariable,
        )?,
        variable_anchor(
            store,
            VariableName::PlatformDb,
            AnchorId::PlatformDb,
            AnchorCategory::AllowList,
            AnchorOrigin::PlatformVariable,
        )?,
        TrustAnchor::new(
            AnchorId::VendorAllowList,
            AnchorCategory::AllowList,
            AnchorOrigin::CompiledIn,
            vendor.vendor_allow.clone(),
        ),
        variable_anchor(
            store,
            VariableName::MokList,
            AnchorId::MachineOwnerList,
            AnchorCategory::AllowList,
            AnchorOrigin::MachineOwnerVariable,
        )?,
        VendorConfig::root_anchor(
            AnchorId::VendorRoot,
            AnchorCategory::VendorRoot,
            &vendor.vendor_root_cert,
        )?,
        VendorConfig::root_anchor(
            AnchorId::FallbackRoot,
            AnchorCategory::FallbackRoot,
            &vendor.fallback_root_cert,
        )?,
    ];

    Ok(TrustSnapshot {
        anchors: TrustAnchors::new(anchors),
        revocation: read_revocation_policy(store, vendor)?,
        flags,
    })
}
