/*++

Licensed under the Apache-2.0 license.

File Name:

    gate.rs

Abstract:

    File contains the top-level verification entry point. It owns the
    collaborators one verification pass needs and measures every verdict.

--*/

use bootgate_common::{FirmwareImageVerificationEnv, VendorConfig};
use bootgate_drivers::printer::HexBytes;
use bootgate_drivers::{cprintln, MeasurementSink, Pkcs7Verifier, Sha1, Sha256, VariableStore};
use bootgate_image_verify::{ImageVerifier, PolicyFlags, VerificationContext, VerificationVerdict};

use crate::pcr::measure_verdict;

/// Anything able to judge an image on behalf of the load-chain hook
pub trait ImageGate {
    /// Verify `image` loaded under `ctx`. Every failure is a rejection.
    fn verify_image(&mut self, image: &[u8], ctx: &VerificationContext) -> VerificationVerdict;
}

/// Boot gate environment
pub struct BootGate<C: Pkcs7Verifier, V: VariableStore, M: MeasurementSink> {
    // SHA1 Engine
    pub sha1: Sha1,

    // SHA2-256 Engine
    pub sha256: Sha256,

    /// PKCS#7 library
    pub crypto: C,

    /// Persisted variables
    pub variables: V,

    /// Compiled-in trust material
    pub vendor: VendorConfig,

    /// Measurement log
    pub measurements: M,
}

impl<C: Pkcs7Verifier, V: VariableStore, M: MeasurementSink> BootGate<C, V, M> {
    pub fn new(crypto: C, variables: V, vendor: VendorConfig, measurements: M) -> Self {
        Self {
            sha1: Sha1::default(),
            sha256: Sha256::default(),
            crypto,
            variables,
            vendor,
            measurements,
        }
    }

    /// Verify a top-level image
    ///
    /// # Arguments
    ///
    /// * `buffer` - Buffer holding the image
    /// * `size` - Declared image size
    ///
    /// # Returns
    ///
    /// * `VerificationVerdict` - Outcome, reason and, on accept, the anchor
    ///   and verification method for the next stage
    pub fn verify(&mut self, buffer: &[u8], size: usize) -> VerificationVerdict {
        self.verify_in_context(buffer, size, &VerificationContext::TOP_LEVEL)
    }

    /// Verify an image loaded by an earlier stage
    pub fn verify_in_context(
        &mut self,
        buffer: &[u8],
        size: usize,
        ctx: &VerificationContext,
    ) -> VerificationVerdict {
        let mut venv = FirmwareImageVerificationEnv {
            sha1: &mut self.sha1,
            sha256: &mut self.sha256,
            crypto: &mut self.crypto,
            variables: &self.variables,
            vendor: &self.vendor,
        };
        let mut verifier = ImageVerifier::new(&mut venv);
        let mut verdict = verifier.verify_with_size(buffer, size, ctx);

        if let Err(err) = measure_verdict(&mut self.measurements, &verdict) {
            cprintln!(
                "[gate] Measurement failed: 0x{}",
                HexBytes(&u32::from(err).to_be_bytes())
            );
            if verdict.is_accepted() && verdict.flags.contains(PolicyFlags::REQUIRE_MEASUREMENT) {
                verdict.reject_with(err);
            }
        }
        verdict
    }
}

impl<C: Pkcs7Verifier, V: VariableStore, M: MeasurementSink> ImageGate for BootGate<C, V, M> {
    fn verify_image(&mut self, image: &[u8], ctx: &VerificationContext) -> VerificationVerdict {
        self.verify_in_context(image, image.len(), ctx)
    }
}
