// Licensed under the Apache-2.0 license

use alloc::vec::Vec;

use bootgate_drivers::persistent::TrustEntry;
use bootgate_drivers::{
    AuthenticodeDigestOp, Pkcs7Verifier, Sha1, Sha256, PREBOOT_VERIFY_OPTIONS,
};
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_gen::{fake_keys, FakeAuthenticode};
use bootgate_image_types::{ImageDigests, Sha256Digest};

use crate::*;

/// Verification environment backed by the software hashes and the fake
/// crypto library
#[derive(Default)]
pub(crate) struct TestEnv {
    pub sha1: Sha1,
    pub sha256: Sha256,
    pub crypto: FakeAuthenticode,
    pub snapshot: TrustSnapshot,
    pub snapshot_unavailable: bool,
}

impl TestEnv {
    /// Vendor and fallback roots only
    pub fn with_roots() -> Self {
        Self {
            snapshot: TrustSnapshot {
                anchors: TrustAnchors::new(vec![
                    TrustAnchor::new(
                        AnchorId::VendorRoot,
                        AnchorCategory::VendorRoot,
                        AnchorOrigin::CompiledIn,
                        vec![TrustEntry::X509(fake_keys::vendor_root_cert())],
                    ),
                    TrustAnchor::new(
                        AnchorId::FallbackRoot,
                        AnchorCategory::FallbackRoot,
                        AnchorOrigin::CompiledIn,
                        vec![TrustEntry::X509(fake_keys::fallback_root_cert())],
                    ),
                ]),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Append an anchor after the existing ones
    pub fn add_anchor(&mut self, id: AnchorId, category: AnchorCategory, entries: Vec<TrustEntry>) {
        let mut anchors: Vec<TrustAnchor> = self.snapshot.anchors.iter().cloned().collect();
        anchors.push(TrustAnchor::new(
            id,
            category,
            AnchorOrigin::PlatformVariable,
            entries,
        ));
        self.snapshot.anchors = TrustAnchors::new(anchors);
    }
}

impl ImageVerificationEnv for TestEnv {
    fn image_digests(&mut self, regions: &[&[u8]]) -> BootGateResult<ImageDigests> {
        let mut op = AuthenticodeDigestOp::new(&mut self.sha1, &mut self.sha256)?;
        for region in regions {
            op.update(region)?;
        }
        op.finalize()
    }

    fn sha256_digest(&mut self, data: &[u8]) -> BootGateResult<Sha256Digest> {
        self.sha256.digest(data)
    }

    fn authenticode_verify(
        &mut self,
        signed_data: &[u8],
        trusted_cert: &[u8],
        digests: &ImageDigests,
    ) -> BootGateResult<bool> {
        self.crypto
            .verify_authenticode(signed_data, trusted_cert, digests, &PREBOOT_VERIFY_OPTIONS)
    }

    fn signer_has_module_signing_eku(&mut self, signed_data: &[u8]) -> BootGateResult<bool> {
        self.crypto.signer_has_module_signing_eku(signed_data)
    }

    fn trust_snapshot(&mut self) -> BootGateResult<TrustSnapshot> {
        if self.snapshot_unavailable {
            return Err(BootGateError::VARIABLE_READ_FAILURE);
        }
        Ok(self.snapshot.clone())
    }
}
