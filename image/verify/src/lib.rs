/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    Boot gate image verification library.

--*/
#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod context;
mod digest;
mod hash_policy;
mod sbat;
mod signature;
#[cfg(test)]
mod test_env;
mod verifier;

use alloc::vec::Vec;
use bitflags::bitflags;
use bootgate_drivers::persistent::TrustEntry;
use bootgate_error::{BootGateError, BootGateResult, ErrorClass};
use bootgate_image_types::{ImageDigests, Sha256Digest};

pub use context::ImageContext;
pub use digest::{authenticode_regions, compute_digests};
pub use hash_policy::{evaluate_hash_policy, HashPolicyDecision};
pub use sbat::{
    check_revocation, find_sbat_section, parse_sbat_records, read_sbat_records, RevocationPolicy,
    SbatRecord,
};
pub use signature::{
    check_denied_signatures, verify_signatures, CertificateTable, SignatureMatch,
    SignatureReport, SignatureResult, WinCertificate,
};
pub use verifier::ImageVerifier;

bitflags! {
    /// Policy switches persisted by the platform owner
    #[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
    pub struct PolicyFlags: u32 {
        /// Do not trust the platform allow list
        const IGNORE_PLATFORM_DB = 0x0000_0001;
        /// Require NX compatible images without W+X sections
        const REQUIRE_NX = 0x0000_0002;
        /// Reject when the measurement cannot be recorded
        const REQUIRE_MEASUREMENT = 0x0000_0004;
    }
}

/// Trust anchor identity
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AnchorId {
    /// Deny list compiled into the boot gate
    VendorDenyList,
    /// Platform deny list variable
    PlatformDbx,
    /// Machine-owner deny list variable
    MachineOwnerDenyList,
    /// Platform allow list variable
    PlatformDb,
    /// Allow list compiled into the boot gate
    VendorAllowList,
    /// Machine-owner allow list variable
    MachineOwnerList,
    /// Distribution vendor root certificate
    VendorRoot,
    /// Embedded fallback root certificate
    FallbackRoot,
}

impl AnchorId {
    pub fn name(&self) -> &'static str {
        match self {
            AnchorId::VendorDenyList => "vendor_dbx",
            AnchorId::PlatformDbx => "dbx",
            AnchorId::MachineOwnerDenyList => "MokListX",
            AnchorId::PlatformDb => "db",
            AnchorId::VendorAllowList => "vendor_db",
            AnchorId::MachineOwnerList => "MokList",
            AnchorId::VendorRoot => "vendor_cert",
            AnchorId::FallbackRoot => "build_cert",
        }
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AnchorCategory {
    DenyList,
    AllowList,
    VendorRoot,
    FallbackRoot,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AnchorOrigin {
    PlatformVariable,
    MachineOwnerVariable,
    CompiledIn,
}

/// One named source of trust
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct TrustAnchor {
    pub id: AnchorId,
    pub category: AnchorCategory,
    pub origin: AnchorOrigin,
    pub entries: Vec<TrustEntry>,
}

impl TrustAnchor {
    pub fn new(
        id: AnchorId,
        category: AnchorCategory,
        origin: AnchorOrigin,
        entries: Vec<TrustEntry>,
    ) -> Self {
        Self {
            id,
            category,
            origin,
            entries,
        }
    }

    pub fn certificates(&self) -> impl Iterator<Item = &[u8]> {
        self.entries.iter().filter_map(|e| e.certificate())
    }
}

/// Ordered set of trust anchors
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TrustAnchors {
    anchors: Vec<TrustAnchor>,
}

impl TrustAnchors {
    pub fn new(anchors: Vec<TrustAnchor>) -> Self {
        Self { anchors }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TrustAnchor> {
        self.anchors.iter()
    }

    pub fn get(&self, id: AnchorId) -> Option<&TrustAnchor> {
        self.anchors.iter().find(|a| a.id == id)
    }

    pub fn deny_anchors(&self) -> impl Iterator<Item = &TrustAnchor> {
        self.anchors
            .iter()
            .filter(|a| a.category == AnchorCategory::DenyList)
    }

    /// Allow lists, honoring `IGNORE_PLATFORM_DB`
    pub fn allow_anchors(&self, flags: PolicyFlags) -> impl Iterator<Item = &TrustAnchor> {
        self.anchors.iter().filter(move |a| {
            a.category == AnchorCategory::AllowList
                && !(a.id == AnchorId::PlatformDb && flags.contains(PolicyFlags::IGNORE_PLATFORM_DB))
        })
    }

    /// Anchors whose certificates may validate a signature: allow lists
    /// first, then the vendor root, then the fallback root.
    pub fn signer_anchors(&self, flags: PolicyFlags) -> impl Iterator<Item = &TrustAnchor> {
        let roots = |category| {
            self.anchors
                .iter()
                .filter(move |a: &&TrustAnchor| a.category == category)
        };
        self.allow_anchors(flags)
            .chain(roots(AnchorCategory::VendorRoot))
            .chain(roots(AnchorCategory::FallbackRoot))
    }
}

/// Read-only view of the persisted and compiled policy, taken once per pass
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TrustSnapshot {
    pub anchors: TrustAnchors,
    pub revocation: RevocationPolicy,
    pub flags: PolicyFlags,
}

/// How the image that loaded the current one was trusted
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub enum VerificationMethod {
    #[default]
    Nothing,
    ByCertificate,
    ByHash,
}

impl VerificationMethod {
    /// The first established method is kept
    pub fn update(&mut self, method: VerificationMethod) {
        if *self == VerificationMethod::Nothing {
            *self = method;
        }
    }
}

/// Context threaded through a chain of nested loads
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct VerificationContext {
    /// The image bytes come from an already verified parent
    pub parent_verified: bool,

    /// How the parent was trusted
    pub parent_method: VerificationMethod,
}

impl VerificationContext {
    pub const TOP_LEVEL: VerificationContext = VerificationContext {
        parent_verified: false,
        parent_method: VerificationMethod::Nothing,
    };

    /// Context for an image loaded by the image `parent` judged.
    /// `from_parent_bytes` is true when the child is a region of the
    /// parent's own verified buffer.
    pub fn nested(parent: &VerificationVerdict, from_parent_bytes: bool) -> Self {
        Self {
            parent_verified: from_parent_bytes && parent.is_accepted(),
            parent_method: parent.method,
        }
    }
}

/// Pipeline stage
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VerificationState {
    Parsing,
    Digesting,
    PolicyCheck,
    SignatureCheck,
    RevocationCheck,
    Verdict,
}

impl VerificationState {
    pub fn name(&self) -> &'static str {
        match self {
            VerificationState::Parsing => "parsing",
            VerificationState::Digesting => "digesting",
            VerificationState::PolicyCheck => "policy",
            VerificationState::SignatureCheck => "signature",
            VerificationState::RevocationCheck => "revocation",
            VerificationState::Verdict => "verdict",
        }
    }
}

/// State entered by the orchestrator and the method established so far
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StateTransition {
    pub state: VerificationState,
    pub method: VerificationMethod,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VerificationOutcome {
    Accept,
    Reject,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum VerificationReason {
    SignatureValid,
    HashAllowListed,
    ParentVerified,
    HashDenyListed,
    SignatureInvalid,
    RevokedGeneration,
    MalformedImage,
    ResourceUnavailable,
}

impl VerificationReason {
    /// Reason reported for a rejection caused by `err`
    pub fn from_error(err: BootGateError) -> Self {
        match err.class() {
            ErrorClass::MalformedImage => VerificationReason::MalformedImage,
            ErrorClass::SignatureInvalid => VerificationReason::SignatureInvalid,
            ErrorClass::HashDenied => VerificationReason::HashDenyListed,
            ErrorClass::GenerationRevoked => VerificationReason::RevokedGeneration,
            _ => VerificationReason::ResourceUnavailable,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            VerificationReason::SignatureValid => "signature valid",
            VerificationReason::HashAllowListed => "hash allow-listed",
            VerificationReason::ParentVerified => "verified parent",
            VerificationReason::HashDenyListed => "hash deny-listed",
            VerificationReason::SignatureInvalid => "signature invalid",
            VerificationReason::RevokedGeneration => "revoked generation",
            VerificationReason::MalformedImage => "malformed image",
            VerificationReason::ResourceUnavailable => "resource unavailable",
        }
    }
}

/// Result of one pipeline pass
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct VerificationVerdict {
    pub outcome: VerificationOutcome,
    pub reason: VerificationReason,

    /// Anchor that produced an accept
    pub anchor: Option<AnchorId>,

    /// Digest of the anchor entry that produced an accept
    pub anchor_entry_digest: Option<Sha256Digest>,

    /// How trust was established; `Nothing` on reject
    pub method: VerificationMethod,

    /// Error behind a rejection
    pub error: Option<BootGateError>,

    /// Authenticode digests, when the image got that far
    pub digests: Option<ImageDigests>,

    /// Policy flags in force for the pass
    pub flags: PolicyFlags,

    /// States entered during the pass
    pub trace: Vec<StateTransition>,
}

impl VerificationVerdict {
    pub fn is_accepted(&self) -> bool {
        self.outcome == VerificationOutcome::Accept
    }

    /// Stage that produced a rejection
    pub fn failed_state(&self) -> Option<VerificationState> {
        if self.is_accepted() {
            return None;
        }
        self.trace
            .iter()
            .rev()
            .map(|t| t.state)
            .find(|state| *state != VerificationState::Verdict)
    }

    /// States entered during the pass, in order
    pub fn states(&self) -> impl Iterator<Item = VerificationState> + '_ {
        self.trace.iter().map(|t| t.state)
    }

    /// Convert an accept into a rejection, keeping the digests and trace
    pub fn reject_with(&mut self, err: BootGateError) {
        self.outcome = VerificationOutcome::Reject;
        self.reason = VerificationReason::from_error(err);
        self.anchor = None;
        self.anchor_entry_digest = None;
        self.method = VerificationMethod::Nothing;
        self.error = Some(err);
    }

    pub fn into_result(self) -> BootGateResult<VerificationVerdict> {
        match self.error {
            Some(err) if !self.is_accepted() => Err(err),
            _ => Ok(self),
        }
    }
}

/// Services the verifier needs from its surroundings
pub trait ImageVerificationEnv {
    /// SHA-1 and SHA-256 over the concatenation of `regions`
    fn image_digests(&mut self, regions: &[&[u8]]) -> BootGateResult<ImageDigests>;

    /// SHA-256 of `data`
    fn sha256_digest(&mut self, data: &[u8]) -> BootGateResult<Sha256Digest>;

    /// Verify an Authenticode signed-data blob against one trusted certificate
    fn authenticode_verify(
        &mut self,
        signed_data: &[u8],
        trusted_cert: &[u8],
        digests: &ImageDigests,
    ) -> BootGateResult<bool>;

    /// Whether the blob's signer is a module signing certificate
    fn signer_has_module_signing_eku(&mut self, signed_data: &[u8]) -> BootGateResult<bool>;

    /// Snapshot of trust anchors, revocation policy and policy flags
    fn trust_snapshot(&mut self) -> BootGateResult<TrustSnapshot>;
}
