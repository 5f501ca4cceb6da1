/*++

Licensed under the Apache-2.0 license.

File Name:

    pcr.rs

Abstract:

    File contains the routine recording verification outcomes in the
    measurement log.

Note:

    PCR4 - Boot application digests, logged whether accepted or not
    PCR7 - Trust anchor that authorized an accepted image

--*/

use bootgate_drivers::pcr_log::{
    EV_EFI_VARIABLE_AUTHORITY, EV_IPL, PCR_ID_BOOT_APPLICATION, PCR_ID_SECURE_BOOT_POLICY,
};
use bootgate_drivers::MeasurementSink;
use bootgate_error::BootGateResult;
use bootgate_image_verify::VerificationVerdict;

/// Measure a verdict
///
/// # Arguments
///
/// * `sink` - Measurement log
/// * `verdict` - Outcome of one verification pass
///
/// Nothing is logged when the pass failed before the digests were computed.
pub fn measure_verdict(
    sink: &mut dyn MeasurementSink,
    verdict: &VerificationVerdict,
) -> BootGateResult<()> {
    let Some(digests) = verdict.digests else {
        return Ok(());
    };

    sink.log_event(
        PCR_ID_BOOT_APPLICATION,
        EV_IPL,
        &digests.sha256,
        verdict.reason.description(),
    )?;

    if !verdict.is_accepted() {
        return Ok(());
    }
    if let (Some(anchor), Some(digest)) = (verdict.anchor, verdict.anchor_entry_digest) {
        sink.log_event(
            PCR_ID_SECURE_BOOT_POLICY,
            EV_EFI_VARIABLE_AUTHORITY,
            &digest,
            anchor.name(),
        )?;
    }
    Ok(())
}
