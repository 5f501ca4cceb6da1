/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains exports for the boot gate driver library: hash engines,
    persisted variable access, the measurement log and the console printer.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

mod image_reader;
pub mod pcr_log;
pub mod persistent;
mod pkcs7;
pub mod printer;
mod sha;
mod variables;

pub use bootgate_error::{BootGateError, BootGateResult, ErrorClass};
pub use image_reader::{ImageReader, MemoryImageReader};
pub use pcr_log::{MeasurementLog, MeasurementLogEntry, MeasurementSink, PcrId};
pub use pkcs7::{Pkcs7Verifier, Pkcs7VerifyOptions, PREBOOT_VERIFY_OPTIONS};
pub use sha::{AuthenticodeDigestOp, Sha1, Sha1DigestOp, Sha256, Sha256DigestOp};
pub use variables::{MemoryVariableStore, VariableAttributes, VariableName, VariableStore};
