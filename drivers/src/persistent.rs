// Licensed under the Apache-2.0 license

//! Binary layout of the trust lists and the revocation override stored in
//! the host variable store.

use alloc::string::String;
use alloc::vec::Vec;
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_types::{
    ImageDigest, Sha1Digest, Sha256Digest, SHA1_DIGEST_BYTE_SIZE, SHA256_DIGEST_BYTE_SIZE,
};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const TRUST_LIST_MAGIC: [u8; 4] = *b"BGTL";
pub const REVOCATION_MAGIC: [u8; 4] = *b"BGRV";
pub const BLOB_VERSION: u16 = 1;
pub const MAX_BLOB_SIZE: usize = 256 * 1024;
pub const REVOCATION_NAME_MAX_SIZE: usize = 48;

pub const TRUST_ENTRY_KIND_SHA1: u16 = 1;
pub const TRUST_ENTRY_KIND_SHA256: u16 = 2;
pub const TRUST_ENTRY_KIND_X509: u16 = 3;

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy)]
pub struct BlobHeader {
    pub magic: [u8; 4],
    pub version: u16,
    pub reserved: u16,
    pub count: u32,
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy)]
pub struct TrustRecordHeader {
    pub kind: u16,
    pub reserved: u16,
    pub len: u32,
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Debug, Clone, Copy)]
pub struct RevocationRecord {
    /// Component name, NUL padded
    pub name: [u8; REVOCATION_NAME_MAX_SIZE],
    pub generation: u32,
}

/// One entry of a hash or certificate list
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TrustEntry {
    Sha1(Sha1Digest),
    Sha256(Sha256Digest),
    /// DER encoded X.509 certificate
    X509(Vec<u8>),
}

impl TrustEntry {
    fn kind(&self) -> u16 {
        match self {
            TrustEntry::Sha1(_) => TRUST_ENTRY_KIND_SHA1,
            TrustEntry::Sha256(_) => TRUST_ENTRY_KIND_SHA256,
            TrustEntry::X509(_) => TRUST_ENTRY_KIND_X509,
        }
    }

    pub fn data(&self) -> &[u8] {
        match self {
            TrustEntry::Sha1(d) => d,
            TrustEntry::Sha256(d) => d,
            TrustEntry::X509(cert) => cert,
        }
    }

    pub fn matches_digest(&self, digest: &ImageDigest) -> bool {
        match (self, digest) {
            (TrustEntry::Sha1(a), ImageDigest::Sha1(b)) => a == b,
            (TrustEntry::Sha256(a), ImageDigest::Sha256(b)) => a == b,
            _ => false,
        }
    }

    pub fn certificate(&self) -> Option<&[u8]> {
        match self {
            TrustEntry::X509(cert) => Some(cert),
            _ => None,
        }
    }
}

impl From<ImageDigest> for TrustEntry {
    fn from(digest: ImageDigest) -> Self {
        match digest {
            ImageDigest::Sha1(d) => TrustEntry::Sha1(d),
            ImageDigest::Sha256(d) => TrustEntry::Sha256(d),
        }
    }
}

/// Checks for a DER SEQUENCE with a two byte length covering the whole buffer
pub fn is_der_certificate(cert: &[u8]) -> bool {
    match cert {
        [0x30, 0x82, hi, lo, rest @ ..] => {
            usize::from(u16::from_be_bytes([*hi, *lo])) == rest.len()
        }
        _ => false,
    }
}

/// Ordered list of trust entries, as persisted in one variable
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct TrustList {
    pub entries: Vec<TrustEntry>,
}

impl TrustList {
    pub fn new(entries: Vec<TrustEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> BootGateResult<Vec<u8>> {
        let mut out = Vec::new();
        let header = BlobHeader {
            magic: TRUST_LIST_MAGIC,
            version: BLOB_VERSION,
            reserved: 0,
            count: u32::try_from(self.entries.len())
                .map_err(|_| BootGateError::PERSIST_BLOB_TOO_LARGE)?,
        };
        out.extend_from_slice(header.as_bytes());
        for entry in &self.entries {
            if let TrustEntry::X509(cert) = entry {
                if !is_der_certificate(cert) {
                    return Err(BootGateError::PERSIST_TRUST_LIST_CERT_NOT_DER);
                }
            }
            let data = entry.data();
            let record = TrustRecordHeader {
                kind: entry.kind(),
                reserved: 0,
                len: u32::try_from(data.len())
                    .map_err(|_| BootGateError::PERSIST_BLOB_TOO_LARGE)?,
            };
            out.extend_from_slice(record.as_bytes());
            out.extend_from_slice(data);
        }
        if out.len() > MAX_BLOB_SIZE {
            return Err(BootGateError::PERSIST_BLOB_TOO_LARGE);
        }
        Ok(out)
    }

    pub fn decode(blob: &[u8]) -> BootGateResult<Self> {
        if blob.len() > MAX_BLOB_SIZE {
            return Err(BootGateError::PERSIST_BLOB_TOO_LARGE);
        }
        let (header, mut rest) = BlobHeader::read_from_prefix(blob)
            .map_err(|_| BootGateError::PERSIST_TRUST_LIST_TRUNCATED)?;
        if header.magic != TRUST_LIST_MAGIC
            || header.version != BLOB_VERSION
            || header.reserved != 0
        {
            return Err(BootGateError::PERSIST_TRUST_LIST_HEADER_INVALID);
        }

        let count = header.count as usize;
        let max_records = rest.len() / core::mem::size_of::<TrustRecordHeader>();
        let mut entries = Vec::with_capacity(count.min(max_records));
        for _ in 0..count {
            let (record, tail) = TrustRecordHeader::read_from_prefix(rest)
                .map_err(|_| BootGateError::PERSIST_TRUST_LIST_TRUNCATED)?;
            if record.reserved != 0 {
                return Err(BootGateError::PERSIST_TRUST_LIST_HEADER_INVALID);
            }
            let len = record.len as usize;
            let data = tail
                .get(..len)
                .ok_or(BootGateError::PERSIST_TRUST_LIST_TRUNCATED)?;
            rest = tail
                .get(len..)
                .ok_or(BootGateError::PERSIST_TRUST_LIST_TRUNCATED)?;
            entries.push(Self::decode_entry(record.kind, data)?);
        }

        if !rest.is_empty() {
            return Err(BootGateError::PERSIST_TRUST_LIST_TRAILING_DATA);
        }
        Ok(Self { entries })
    }

    fn decode_entry(kind: u16, data: &[u8]) -> BootGateResult<TrustEntry> {
        match kind {
            TRUST_ENTRY_KIND_SHA1 => Sha1Digest::try_from(data)
                .map(TrustEntry::Sha1)
                .map_err(|_| BootGateError::PERSIST_TRUST_LIST_DIGEST_LENGTH_INVALID),
            TRUST_ENTRY_KIND_SHA256 => Sha256Digest::try_from(data)
                .map(TrustEntry::Sha256)
                .map_err(|_| BootGateError::PERSIST_TRUST_LIST_DIGEST_LENGTH_INVALID),
            TRUST_ENTRY_KIND_X509 => {
                if !is_der_certificate(data) {
                    return Err(BootGateError::PERSIST_TRUST_LIST_CERT_NOT_DER);
                }
                Ok(TrustEntry::X509(data.to_vec()))
            }
            _ => Err(BootGateError::PERSIST_TRUST_LIST_KIND_INVALID),
        }
    }
}

/// Minimum generation for one component
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RevocationEntry {
    pub name: String,
    pub generation: u32,
}

impl RevocationEntry {
    pub fn new(name: &str, generation: u32) -> Self {
        Self {
            name: String::from(name),
            generation,
        }
    }
}

fn validate_component_name(name: &[u8]) -> BootGateResult<()> {
    if name.is_empty()
        || name.len() > REVOCATION_NAME_MAX_SIZE
        || !name.iter().all(|c| c.is_ascii_graphic())
    {
        return Err(BootGateError::PERSIST_REVOCATION_NAME_INVALID);
    }
    Ok(())
}

/// Persisted revocation override
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RevocationList {
    pub entries: Vec<RevocationEntry>,
}

impl RevocationList {
    pub fn new(entries: Vec<RevocationEntry>) -> Self {
        Self { entries }
    }

    pub fn generation_of(&self, name: &str) -> Option<u32> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.generation)
    }

    pub fn encode(&self) -> BootGateResult<Vec<u8>> {
        self.check_names()?;
        let header = BlobHeader {
            magic: REVOCATION_MAGIC,
            version: BLOB_VERSION,
            reserved: 0,
            count: u32::try_from(self.entries.len())
                .map_err(|_| BootGateError::PERSIST_BLOB_TOO_LARGE)?,
        };
        let mut out = Vec::new();
        out.extend_from_slice(header.as_bytes());
        for entry in &self.entries {
            let mut record = RevocationRecord {
                name: [0; REVOCATION_NAME_MAX_SIZE],
                generation: entry.generation,
            };
            record.name[..entry.name.len()].copy_from_slice(entry.name.as_bytes());
            out.extend_from_slice(record.as_bytes());
        }
        if out.len() > MAX_BLOB_SIZE {
            return Err(BootGateError::PERSIST_BLOB_TOO_LARGE);
        }
        Ok(out)
    }

    pub fn decode(blob: &[u8]) -> BootGateResult<Self> {
        if blob.len() > MAX_BLOB_SIZE {
            return Err(BootGateError::PERSIST_BLOB_TOO_LARGE);
        }
        let (header, records) = BlobHeader::read_from_prefix(blob)
            .map_err(|_| BootGateError::PERSIST_REVOCATION_TRUNCATED)?;
        if header.magic != REVOCATION_MAGIC
            || header.version != BLOB_VERSION
            || header.reserved != 0
        {
            return Err(BootGateError::PERSIST_REVOCATION_HEADER_INVALID);
        }

        let record_size = core::mem::size_of::<RevocationRecord>();
        let expected = (header.count as usize)
            .checked_mul(record_size)
            .ok_or(BootGateError::PERSIST_REVOCATION_TRUNCATED)?;
        if records.len() < expected {
            return Err(BootGateError::PERSIST_REVOCATION_TRUNCATED);
        }
        if records.len() > expected {
            return Err(BootGateError::PERSIST_REVOCATION_TRAILING_DATA);
        }

        let mut entries = Vec::with_capacity(header.count as usize);
        for chunk in records.chunks_exact(record_size) {
            let record = RevocationRecord::read_from_bytes(chunk)
                .map_err(|_| BootGateError::PERSIST_REVOCATION_TRUNCATED)?;
            let len = record
                .name
                .iter()
                .position(|&c| c == 0)
                .unwrap_or(REVOCATION_NAME_MAX_SIZE);
            let (name, padding) = record.name.split_at(len);
            if padding.iter().any(|&c| c != 0) {
                return Err(BootGateError::PERSIST_REVOCATION_NAME_INVALID);
            }
            validate_component_name(name)?;
            let name = core::str::from_utf8(name)
                .map_err(|_| BootGateError::PERSIST_REVOCATION_NAME_INVALID)?;
            entries.push(RevocationEntry::new(name, record.generation));
        }

        let list = Self { entries };
        list.check_names()?;
        Ok(list)
    }

    fn check_names(&self) -> BootGateResult<()> {
        for (i, entry) in self.entries.iter().enumerate() {
            validate_component_name(entry.name.as_bytes())?;
            if self.entries[..i].iter().any(|e| e.name == entry.name) {
                return Err(BootGateError::PERSIST_REVOCATION_NAME_DUPLICATE);
            }
        }
        Ok(())
    }
}

/// Encoded `PolicyFlags` variable: a little endian u32
pub fn decode_policy_word(blob: &[u8]) -> BootGateResult<u32> {
    let bytes: [u8; 4] = blob
        .try_into()
        .map_err(|_| BootGateError::PERSIST_POLICY_FLAGS_INVALID)?;
    Ok(u32::from_le_bytes(bytes))
}
