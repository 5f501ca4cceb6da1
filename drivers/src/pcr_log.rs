/*++
Licensed under the Apache-2.0 license.

File Name:

    pcr_log.rs

Abstract:

    Measured boot log types and the bounded in-memory measurement log.

--*/

use alloc::vec::Vec;
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_types::Sha256Digest;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
use zeroize::Zeroize;

pub const PCR_ID_BOOT_APPLICATION: PcrId = PcrId::PcrId4;
pub const PCR_ID_SECURE_BOOT_POLICY: PcrId = PcrId::PcrId7;

pub const EV_IPL: u32 = 0x0000_000D;
pub const EV_EFI_VARIABLE_AUTHORITY: u32 = 0x8000_00E0;

pub const MEASUREMENT_DESCRIPTION_MAX_SIZE: usize = 48;
pub const MEASUREMENT_MAX_COUNT: usize = 64;

/// PCR identifiers available to pre-boot code
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum PcrId {
    PcrId0 = 0,
    PcrId1 = 1,
    PcrId2 = 2,
    PcrId3 = 3,
    PcrId4 = 4,
    PcrId5 = 5,
    PcrId6 = 6,
    PcrId7 = 7,
}

impl From<PcrId> for u32 {
    fn from(id: PcrId) -> Self {
        id as u32
    }
}

/// Measurement log entry
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Clone, Copy, Debug, Zeroize)]
pub struct MeasurementLogEntry {
    /// PCR the digest is extended into
    pub pcr: u32,

    pub event_type: u32,

    pub digest: Sha256Digest,

    /// NUL padded, truncated if longer
    pub description: [u8; MEASUREMENT_DESCRIPTION_MAX_SIZE],
}

impl MeasurementLogEntry {
    pub fn new(pcr: PcrId, event_type: u32, digest: &Sha256Digest, description: &str) -> Self {
        let mut entry = Self {
            pcr: pcr.into(),
            event_type,
            digest: *digest,
            description: [0; MEASUREMENT_DESCRIPTION_MAX_SIZE],
        };
        let len = description.len().min(MEASUREMENT_DESCRIPTION_MAX_SIZE);
        entry.description[..len].copy_from_slice(&description.as_bytes()[..len]);
        entry
    }

    pub fn description(&self) -> &[u8] {
        let end = self
            .description
            .iter()
            .position(|&c| c == 0)
            .unwrap_or(MEASUREMENT_DESCRIPTION_MAX_SIZE);
        &self.description[..end]
    }
}

/// Measured-boot log-append primitive
pub trait MeasurementSink {
    fn log_event(
        &mut self,
        pcr: PcrId,
        event_type: u32,
        digest: &Sha256Digest,
        description: &str,
    ) -> BootGateResult<()>;
}

/// Append-only, bounded measurement log
#[derive(Default)]
pub struct MeasurementLog {
    entries: Vec<MeasurementLogEntry>,
}

impl MeasurementLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> &[MeasurementLogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialized log, entries back to back
    pub fn as_bytes(&self) -> &[u8] {
        self.entries.as_slice().as_bytes()
    }
}

impl MeasurementSink for MeasurementLog {
    fn log_event(
        &mut self,
        pcr: PcrId,
        event_type: u32,
        digest: &Sha256Digest,
        description: &str,
    ) -> BootGateResult<()> {
        if self.entries.len() >= MEASUREMENT_MAX_COUNT {
            return Err(BootGateError::MEASUREMENT_LOG_FULL);
        }
        self.entries
            .push(MeasurementLogEntry::new(pcr, event_type, digest, description));
        Ok(())
    }
}
