/*++

Licensed under the Apache-2.0 license.

File Name:

    verifier.rs

Abstract:

    Image Verification support routines.

--*/

use bootgate_drivers::*;
use bootgate_image_types::*;
use bootgate_image_verify::{ImageVerificationEnv, TrustSnapshot};

use crate::trust_store::{load_trust_snapshot, VendorConfig};

/// Firmware Verification Environment
pub struct FirmwareImageVerificationEnv<'a> {
    pub sha1: &'a mut Sha1,
    pub sha256: &'a mut Sha256,
    pub crypto: &'a mut dyn Pkcs7Verifier,
    pub variables: &'a dyn VariableStore,
    pub vendor: &'a VendorConfig,
}

impl ImageVerificationEnv for &mut FirmwareImageVerificationEnv<'_> {
    /// Calculate SHA-1 and SHA-256 in one pass over the hashed regions
    fn image_digests(&mut self, regions: &[&[u8]]) -> BootGateResult<ImageDigests> {
        let mut op = AuthenticodeDigestOp::new(self.sha1, self.sha256)?;
        for region in regions {
            op.update(region)?;
        }
        op.finalize()
    }

    fn sha256_digest(&mut self, data: &[u8]) -> BootGateResult<Sha256Digest> {
        self.sha256.digest(data)
    }

    /// Authenticode verification routine. Certificate validity periods are
    /// never enforced before the OS boots.
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

    /// Retrieve trust anchors, revocation policy and policy flags
    fn trust_snapshot(&mut self) -> BootGateResult<TrustSnapshot> {
        load_trust_snapshot(self.variables, self.vendor)
    }
}
