/*++

Licensed under the Apache-2.0 license.

File Name:

    flow.rs

Abstract:

    File contains the flow handing control to the next boot stage.

--*/

use bootgate_drivers::printer::HexBytes;
use bootgate_drivers::{cprintln, ImageReader};
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_verify::{VerificationContext, VerificationVerdict};

use crate::gate::ImageGate;
use crate::hook::{install_load_chain_hook, BootServiceTable, HostImageServices, ImageServices};

/// Verify and start the next stage
///
/// # Arguments
///
/// * `table` - Host service table
/// * `gate` - Verifier for the next stage and everything it loads
/// * `path` - Location of the next stage image
///
/// # Returns
///
/// * `VerificationVerdict` - Verdict of the next stage, once it has returned.
///   A rejected image is never loaded and its error is returned instead.
///
/// The load-chain hook is in place while the next stage runs and is removed
/// on every exit path. The next stage is handed the hooked entry points, so
/// every image it loads is verified as well.
pub fn boot_next_stage<S: HostImageServices, G: ImageGate>(
    table: &mut BootServiceTable<S>,
    gate: &mut G,
    path: &str,
) -> BootGateResult<VerificationVerdict> {
    cprintln!("[boot] Loading {}", path);
    let image = table.native_mut().read_image(path)?;

    let verdict = gate.verify_image(&image, &VerificationContext::TOP_LEVEL);
    if !verdict.is_accepted() {
        let err = verdict
            .error
            .unwrap_or(BootGateError::LOADER_SECURITY_VIOLATION);
        cprintln!(
            "[boot] Verification failed: {} (0x{})",
            verdict.reason.description(),
            HexBytes(&u32::from(err).to_be_bytes())
        );
        return Err(err);
    }

    let mut guard = install_load_chain_hook(table, gate)?;
    let handle = guard.load_verified(image, verdict.clone())?;
    guard.start_image(handle)?;
    cprintln!("[boot] Next stage returned");
    Ok(verdict)
}
