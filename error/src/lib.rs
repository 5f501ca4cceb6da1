/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    File contains API and macros used by the library for error handling

--*/
#![cfg_attr(not(feature = "std"), no_std)]
use core::convert::From;
use core::num::{NonZeroU32, TryFromIntError};

/// Boot gate error type
///
/// The most significant byte of the code is the error class, the next byte
/// identifies the subsystem that raised it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct BootGateError(pub NonZeroU32);

/// Error class, used by the orchestrator to pick a verdict reason.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    MalformedImage,
    SignatureInvalid,
    HashDenied,
    GenerationRevoked,
    ResourceUnavailable,
    SecurityViolation,
    InvalidRequest,
    Unknown,
}

/// Macro to define error constants ensuring uniqueness
///
/// This macro takes a list of (name, value, doc) tuples and generates
/// constant definitions for each error code.
#[macro_export]
macro_rules! define_error_constants {
    ($(($name:ident, $value:expr, $doc:expr)),* $(,)?) => {
        $(
            #[doc = $doc]
            pub const $name: BootGateError = BootGateError::new_const($value);
        )*

        #[cfg(test)]
        /// Returns a vector of all defined error constants for testing uniqueness
        pub fn all_constants() -> Vec<(&'static str, u32)> {
            vec![
                $(
                    (stringify!($name), $value),
                )*
            ]
        }
    };
}

impl BootGateError {
    /// Create a boot gate error; intended to only be used from const contexts, as we don't want
    /// runtime panics if val is zero. The preferred way to get a BootGateError from a u32 is to
    /// use `BootGateError::try_from()` from the `TryFrom` trait impl.
    const fn new_const(val: u32) -> Self {
        match NonZeroU32::new(val) {
            Some(val) => Self(val),
            None => panic!("BootGateError cannot be 0"),
        }
    }

    /// Error class encoded in the top byte of the code.
    pub fn class(&self) -> ErrorClass {
        match self.0.get() >> 24 {
            0x01 => ErrorClass::MalformedImage,
            0x02 => ErrorClass::SignatureInvalid,
            0x03 => ErrorClass::HashDenied,
            0x04 => ErrorClass::GenerationRevoked,
            0x05 => ErrorClass::ResourceUnavailable,
            0x06 => ErrorClass::SecurityViolation,
            0x07 => ErrorClass::InvalidRequest,
            _ => ErrorClass::Unknown,
        }
    }

    define_error_constants![
        // Image structure
        (IMAGE_PARSE_BUFFER_EMPTY, 0x0101_0001, "Image buffer is empty"),
        (
            IMAGE_PARSE_DOS_HEADER_TRUNCATED,
            0x0101_0002,
            "Image is smaller than the DOS header"
        ),
        (
            IMAGE_PARSE_DOS_SIGNATURE_MISMATCH,
            0x0101_0003,
            "DOS header signature is not MZ"
        ),
        (
            IMAGE_PARSE_PE_OFFSET_OUT_OF_BOUNDS,
            0x0101_0004,
            "PE header offset points outside the image"
        ),
        (
            IMAGE_PARSE_PE_SIGNATURE_MISMATCH,
            0x0101_0005,
            "PE signature mismatch"
        ),
        (
            IMAGE_PARSE_FILE_HEADER_TRUNCATED,
            0x0101_0006,
            "COFF file header truncated"
        ),
        (
            IMAGE_PARSE_OPTIONAL_HEADER_TRUNCATED,
            0x0101_0007,
            "Optional header truncated"
        ),
        (
            IMAGE_PARSE_OPTIONAL_HEADER_MAGIC_INVALID,
            0x0101_0008,
            "Optional header magic is neither PE32 nor PE32+"
        ),
        (
            IMAGE_PARSE_OPTIONAL_HEADER_SIZE_MISMATCH,
            0x0101_0009,
            "Optional header size does not match its data directory count"
        ),
        (
            IMAGE_PARSE_DATA_DIRECTORY_COUNT_INVALID,
            0x0101_000A,
            "Data directory count invalid or missing the security directory"
        ),
        (
            IMAGE_PARSE_FILE_ALIGNMENT_INVALID,
            0x0101_000B,
            "File alignment is odd"
        ),
        (
            IMAGE_PARSE_RELOCS_STRIPPED,
            0x0101_000C,
            "Image has its relocations stripped"
        ),
        (
            IMAGE_PARSE_HEADERS_SIZE_INVALID,
            0x0101_000D,
            "SizeOfHeaders exceeds the image or SizeOfImage"
        ),
        (
            IMAGE_PARSE_SECTION_COUNT_INVALID,
            0x0101_000E,
            "Image declares no sections"
        ),
        (
            IMAGE_PARSE_SECTION_TABLE_OVERFLOW,
            0x0101_000F,
            "Section table does not fit in the headers"
        ),
        (
            IMAGE_PARSE_SECTION_OUT_OF_BOUNDS,
            0x0101_0010,
            "Section raw data lies outside the image"
        ),
        (
            IMAGE_PARSE_SECTION_OVERLAPS_HEADERS,
            0x0101_0011,
            "Section raw data overlaps the headers"
        ),
        (
            IMAGE_PARSE_ENTRY_POINT_INVALID,
            0x0101_0012,
            "Entry point is not inside exactly one section"
        ),
        (
            IMAGE_PARSE_CERT_DIR_OUT_OF_BOUNDS,
            0x0101_0013,
            "Certificate directory lies outside the image"
        ),
        (
            IMAGE_PARSE_CERT_DIR_OVERLAPS_HEADERS,
            0x0101_0014,
            "Certificate directory overlaps the headers"
        ),
        (
            IMAGE_PARSE_ARITHMETIC_OVERFLOW,
            0x0101_0015,
            "Header arithmetic overflow"
        ),
        (
            IMAGE_PARSE_SIZE_EXCEEDS_BUFFER,
            0x0101_0016,
            "Declared image size exceeds the buffer"
        ),
        (
            IMAGE_PARSE_CERT_DIR_NOT_AT_END,
            0x0101_0017,
            "Certificate directory does not end at the end of the image"
        ),
        (
            IMAGE_POLICY_NX_COMPAT_REQUIRED,
            0x0102_0001,
            "Image is not NX compatible"
        ),
        (
            IMAGE_POLICY_WRITABLE_EXECUTABLE_SECTION,
            0x0102_0002,
            "Image has a writable and executable section"
        ),
        (
            IMAGE_DIGEST_REGION_OUT_OF_BOUNDS,
            0x0103_0001,
            "Digest region lies outside the image"
        ),
        (
            IMAGE_DIGEST_TRAILING_DATA_INVALID,
            0x0103_0002,
            "Hashed sections extend past the certificate table"
        ),
        (
            IMAGE_CERT_ENTRY_HEADER_TRUNCATED,
            0x0104_0001,
            "WIN_CERTIFICATE header truncated"
        ),
        (
            IMAGE_CERT_ENTRY_LENGTH_INVALID,
            0x0104_0002,
            "WIN_CERTIFICATE length invalid"
        ),
        (
            IMAGE_SBAT_MULTIPLE_SECTIONS,
            0x0105_0001,
            "Image has more than one .sbat section"
        ),
        (
            IMAGE_SBAT_SECTION_OUT_OF_BOUNDS,
            0x0105_0002,
            ".sbat section lies outside the image"
        ),
        (
            IMAGE_SBAT_RECORD_FIELD_COUNT,
            0x0105_0003,
            "SBAT record has the wrong number of fields"
        ),
        (
            IMAGE_SBAT_RECORD_UNTERMINATED,
            0x0105_0004,
            "SBAT record is missing its newline terminator"
        ),
        (
            IMAGE_SBAT_GENERATION_INVALID,
            0x0105_0005,
            "SBAT generation is not a number"
        ),
        (
            IMAGE_SBAT_NAME_INVALID,
            0x0105_0006,
            "SBAT component name is empty or not ASCII"
        ),
        (IMAGE_SBAT_EMPTY, 0x0105_0007, ".sbat section has no records"),
        (
            IMAGE_SBAT_SECTION_RELOCATED,
            0x0105_0008,
            ".sbat section carries relocations"
        ),
        (IMAGE_SBAT_NOT_TEXT, 0x0105_0009, ".sbat section is not UTF-8"),
        // Signatures
        (
            SIGNATURE_NOT_PRESENT,
            0x0201_0001,
            "Image carries no certificate directory"
        ),
        (
            SIGNATURE_NO_PKCS_ENTRY,
            0x0201_0002,
            "Certificate directory has no PKCS signed-data entry"
        ),
        (
            SIGNATURE_NO_MATCHING_ANCHOR,
            0x0201_0003,
            "No signature validates against any trust anchor"
        ),
        (
            SIGNATURE_SIGNED_DATA_MALFORMED,
            0x0201_0004,
            "Signed-data blob could not be decoded"
        ),
        (
            SIGNATURE_MODULE_SIGNING_EKU,
            0x0201_0005,
            "Signer certificate is restricted to module signing"
        ),
        // Deny lists
        (
            POLICY_HASH_DENY_LISTED,
            0x0301_0001,
            "Image digest is deny-listed"
        ),
        (
            POLICY_CERT_DENY_LISTED,
            0x0301_0002,
            "Image is signed by a deny-listed certificate"
        ),
        // Revocation
        (
            SBAT_GENERATION_REVOKED,
            0x0401_0001,
            "Component generation is below the revocation minimum"
        ),
        (
            SBAT_SECTION_MISSING,
            0x0401_0002,
            "Image has no SBAT data while a revocation policy is active"
        ),
        // External collaborators
        (CRYPTO_DIGEST_FAILURE, 0x0501_0001, "Digest computation failed"),
        (
            CRYPTO_VERIFY_FAILURE,
            0x0501_0002,
            "Crypto library failed to evaluate a signature"
        ),
        (
            VARIABLE_READ_FAILURE,
            0x0502_0001,
            "Persisted variable could not be read"
        ),
        (
            VARIABLE_WRITE_FAILURE,
            0x0502_0002,
            "Persisted variable could not be written"
        ),
        (
            VARIABLE_ATTRIBUTES_INVALID,
            0x0502_0003,
            "Persisted variable lacks the required attributes"
        ),
        (
            PERSIST_TRUST_LIST_HEADER_INVALID,
            0x0503_0001,
            "Trust list blob header invalid"
        ),
        (
            PERSIST_TRUST_LIST_TRUNCATED,
            0x0503_0002,
            "Trust list blob truncated"
        ),
        (
            PERSIST_TRUST_LIST_TRAILING_DATA,
            0x0503_0003,
            "Trust list blob has trailing bytes"
        ),
        (
            PERSIST_TRUST_LIST_KIND_INVALID,
            0x0503_0004,
            "Trust list entry kind unknown"
        ),
        (
            PERSIST_TRUST_LIST_DIGEST_LENGTH_INVALID,
            0x0503_0005,
            "Trust list digest entry has the wrong length"
        ),
        (
            PERSIST_TRUST_LIST_CERT_NOT_DER,
            0x0503_0006,
            "Trust list certificate is not DER encoded"
        ),
        (
            PERSIST_REVOCATION_HEADER_INVALID,
            0x0503_0007,
            "Revocation blob header invalid"
        ),
        (
            PERSIST_REVOCATION_TRUNCATED,
            0x0503_0008,
            "Revocation blob truncated"
        ),
        (
            PERSIST_REVOCATION_TRAILING_DATA,
            0x0503_0009,
            "Revocation blob has trailing bytes"
        ),
        (
            PERSIST_REVOCATION_NAME_INVALID,
            0x0503_000A,
            "Revocation component name empty, too long or not ASCII"
        ),
        (
            PERSIST_REVOCATION_NAME_DUPLICATE,
            0x0503_000B,
            "Revocation component name repeated"
        ),
        (
            PERSIST_POLICY_FLAGS_INVALID,
            0x0503_000C,
            "Policy flags variable invalid"
        ),
        (
            PERSIST_BLOB_TOO_LARGE,
            0x0503_000D,
            "Persisted blob exceeds its size limit"
        ),
        (
            SBAT_POLICY_TEXT_INVALID,
            0x0503_000E,
            "Revocation policy text could not be parsed"
        ),
        (MEASUREMENT_LOG_FULL, 0x0504_0001, "Measurement log is full"),
        (
            IMAGE_READ_NOT_FOUND,
            0x0505_0001,
            "Requested image was not found"
        ),
        (IMAGE_READ_FAILURE, 0x0505_0002, "Requested image read failed"),
        // Load chain
        (
            LOADER_SECURITY_VIOLATION,
            0x0601_0001,
            "Image failed verification and was not loaded"
        ),
        (
            LOADER_HOOK_ALREADY_INSTALLED,
            0x0701_0001,
            "Load-chain hook is already installed"
        ),
        (
            LOADER_HOOK_NOT_INSTALLED,
            0x0701_0002,
            "Load-chain hook is not installed"
        ),
        (
            LOADER_IMAGE_ALREADY_STARTED,
            0x0701_0003,
            "Image has already been started"
        ),
        (
            LOADER_INVALID_HANDLE,
            0x0701_0004,
            "Image handle is unknown"
        ),
        (
            LOADER_PARENT_SECTION_INVALID,
            0x0701_0005,
            "Parent section request does not reference a verified parent"
        ),
        (
            ADMIN_ENTRY_INVALID,
            0x0701_0006,
            "Administrative update entry invalid"
        ),
        (
            ADMIN_VARIABLE_INVALID,
            0x0701_0007,
            "Variable cannot be updated by this operation"
        ),
    ];
}

impl From<core::num::NonZeroU32> for crate::BootGateError {
    fn from(val: core::num::NonZeroU32) -> Self {
        crate::BootGateError(val)
    }
}

impl From<BootGateError> for core::num::NonZeroU32 {
    fn from(val: BootGateError) -> Self {
        val.0
    }
}

impl From<BootGateError> for u32 {
    fn from(val: BootGateError) -> Self {
        core::num::NonZeroU32::from(val).get()
    }
}

impl TryFrom<u32> for BootGateError {
    type Error = TryFromIntError;
    fn try_from(val: u32) -> Result<Self, TryFromIntError> {
        match NonZeroU32::try_from(val) {
            Ok(val) => Ok(BootGateError(val)),
            Err(err) => Err(err),
        }
    }
}

pub type BootGateResult<T> = Result<T, BootGateError>;
