// Licensed under the Apache-2.0 license.

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod trust_store;
pub mod verifier;

pub use bootgate_drivers::cprint;
pub use bootgate_drivers::cprintln;
pub use bootgate_drivers::pcr_log as pcr;
pub use bootgate_drivers::printer::HexBytes;
pub use bootgate_drivers::printer::Printer;
pub use pcr::{MeasurementLog, MeasurementSink, PcrId};
pub use trust_store::{load_trust_snapshot, VendorConfig, DEFAULT_SBAT_BASELINE};
pub use verifier::FirmwareImageVerificationEnv;
