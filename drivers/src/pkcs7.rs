// Licensed under the Apache-2.0 license

use bootgate_error::BootGateResult;
use bootgate_image_types::ImageDigests;

/// Options handed to the crypto library for every Authenticode check
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Pkcs7VerifyOptions {
    /// Enforce certificate notBefore/notAfter
    pub check_validity_period: bool,
}

/// There is no trusted clock before the OS boots, so certificate validity
/// periods are not evaluated.
pub const PREBOOT_VERIFY_OPTIONS: Pkcs7VerifyOptions = Pkcs7VerifyOptions {
    check_validity_period: false,
};

/// PKCS#7 signed-data verification supplied by the crypto library
pub trait Pkcs7Verifier {
    /// Verify an Authenticode signed-data blob.
    ///
    /// Returns `Ok(true)` when the blob's indirect data digest equals the
    /// matching entry of `digests` and its signer chains to `trusted_cert`.
    /// Returns `Ok(false)` when the blob is well formed but does not chain to
    /// `trusted_cert`. A blob that cannot be decoded is an error.
    fn verify_authenticode(
        &mut self,
        signed_data: &[u8],
        trusted_cert: &[u8],
        digests: &ImageDigests,
        options: &Pkcs7VerifyOptions,
    ) -> BootGateResult<bool>;

    /// Check whether the blob's signer certificate carries the module signing
    /// extended key usage.
    fn signer_has_module_signing_eku(&mut self, signed_data: &[u8]) -> BootGateResult<bool>;
}
