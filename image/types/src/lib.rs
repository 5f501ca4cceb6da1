/*++

Licensed under the Apache-2.0 license.

File Name:

   lib.rs

Abstract:

    File contains data structures for PE/COFF images and their embedded
    Authenticode certificate table.

--*/

#![cfg_attr(not(feature = "std"), no_std)]

use core::ops::Range;

use memoffset::{offset_of, span_of};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};
use zeroize::Zeroize;

pub const IMAGE_DOS_SIGNATURE: u16 = 0x5A4D;
pub const IMAGE_NT_SIGNATURE: u32 = 0x0000_4550;
pub const IMAGE_NT_OPTIONAL_HDR32_MAGIC: u16 = 0x10B;
pub const IMAGE_NT_OPTIONAL_HDR64_MAGIC: u16 = 0x20B;
pub const IMAGE_NUMBEROF_DIRECTORY_ENTRIES: u32 = 16;
pub const IMAGE_DIRECTORY_ENTRY_SECURITY: u32 = 4;
pub const IMAGE_FILE_RELOCS_STRIPPED: u16 = 0x0001;
pub const IMAGE_DLLCHARACTERISTICS_NX_COMPAT: u16 = 0x0100;
pub const IMAGE_SCN_MEM_EXECUTE: u32 = 0x2000_0000;
pub const IMAGE_SCN_MEM_WRITE: u32 = 0x8000_0000;
pub const IMAGE_SIZEOF_SHORT_NAME: usize = 8;
pub const PE_SIGNATURE_BYTE_SIZE: usize = 4;

pub const DEFAULT_FILE_ALIGNMENT: u32 = 0x200;
pub const DEFAULT_SECTION_ALIGNMENT: u32 = 0x1000;

pub const WIN_CERT_REVISION_2_0: u16 = 0x0200;
pub const WIN_CERT_TYPE_PKCS_SIGNED_DATA: u16 = 0x0002;
pub const WIN_CERT_ALIGNMENT: usize = 8;

pub const SBAT_SECTION_NAME: [u8; IMAGE_SIZEOF_SHORT_NAME] = *b".sbat\0\0\0";

pub const SHA1_DIGEST_BYTE_SIZE: usize = 20;
pub const SHA256_DIGEST_BYTE_SIZE: usize = 32;

pub type Sha1Digest = [u8; SHA1_DIGEST_BYTE_SIZE];
pub type Sha256Digest = [u8; SHA256_DIGEST_BYTE_SIZE];

pub const IMAGE_DOS_HEADER_BYTE_SIZE: usize = core::mem::size_of::<ImageDosHeader>();
pub const IMAGE_FILE_HEADER_BYTE_SIZE: usize = core::mem::size_of::<ImageFileHeader>();
pub const IMAGE_DATA_DIRECTORY_BYTE_SIZE: usize = core::mem::size_of::<ImageDataDirectory>();
pub const IMAGE_SECTION_HEADER_BYTE_SIZE: usize = core::mem::size_of::<ImageSectionHeader>();
pub const WIN_CERTIFICATE_HEADER_BYTE_SIZE: usize =
    core::mem::size_of::<WinCertificateHeader>();

/// MS-DOS stub header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy)]
pub struct ImageDosHeader {
    /// Magic number (MZ)
    pub e_magic: u16,
    pub e_cblp: u16,
    pub e_cp: u16,
    pub e_crlc: u16,
    pub e_cparhdr: u16,
    pub e_minalloc: u16,
    pub e_maxalloc: u16,
    pub e_ss: u16,
    pub e_sp: u16,
    pub e_csum: u16,
    pub e_ip: u16,
    pub e_cs: u16,
    pub e_lfarlc: u16,
    pub e_ovno: u16,
    pub e_res: [u16; 4],
    pub e_oemid: u16,
    pub e_oeminfo: u16,
    pub e_res2: [u16; 10],

    /// File offset of the PE signature
    pub e_lfanew: u32,
}

/// COFF file header
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy)]
pub struct ImageFileHeader {
    pub machine: u16,
    pub number_of_sections: u16,
    pub time_date_stamp: u32,
    pub pointer_to_symbol_table: u32,
    pub number_of_symbols: u32,
    pub size_of_optional_header: u16,
    pub characteristics: u16,
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct ImageDataDirectory {
    pub virtual_address: u32,
    pub size: u32,
}

impl ImageDataDirectory {
    pub fn is_empty(&self) -> bool {
        self.size == 0
    }
}

/// PE32 optional header, without the trailing data directories
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy)]
pub struct ImageOptionalHeader32 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub base_of_data: u32,
    pub image_base: u32,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u32,
    pub size_of_stack_commit: u32,
    pub size_of_heap_reserve: u32,
    pub size_of_heap_commit: u32,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// PE32+ optional header, without the trailing data directories
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy)]
pub struct ImageOptionalHeader64 {
    pub magic: u16,
    pub major_linker_version: u8,
    pub minor_linker_version: u8,
    pub size_of_code: u32,
    pub size_of_initialized_data: u32,
    pub size_of_uninitialized_data: u32,
    pub address_of_entry_point: u32,
    pub base_of_code: u32,
    pub image_base: u64,
    pub section_alignment: u32,
    pub file_alignment: u32,
    pub major_operating_system_version: u16,
    pub minor_operating_system_version: u16,
    pub major_image_version: u16,
    pub minor_image_version: u16,
    pub major_subsystem_version: u16,
    pub minor_subsystem_version: u16,
    pub win32_version_value: u32,
    pub size_of_image: u32,
    pub size_of_headers: u32,
    pub check_sum: u32,
    pub subsystem: u16,
    pub dll_characteristics: u16,
    pub size_of_stack_reserve: u64,
    pub size_of_stack_commit: u64,
    pub size_of_heap_reserve: u64,
    pub size_of_heap_commit: u64,
    pub loader_flags: u32,
    pub number_of_rva_and_sizes: u32,
}

/// Optional header flavour
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum OptionalHeaderKind {
    Pe32,
    Pe32Plus,
}

impl OptionalHeaderKind {
    /// Size of the optional header excluding data directories
    pub fn fixed_size(&self) -> usize {
        match self {
            OptionalHeaderKind::Pe32 => core::mem::size_of::<ImageOptionalHeader32>(),
            OptionalHeaderKind::Pe32Plus => core::mem::size_of::<ImageOptionalHeader64>(),
        }
    }

    /// Offset of the checksum field relative to the optional header
    pub fn checksum_offset(&self) -> usize {
        match self {
            OptionalHeaderKind::Pe32 => offset_of!(ImageOptionalHeader32, check_sum),
            OptionalHeaderKind::Pe32Plus => offset_of!(ImageOptionalHeader64, check_sum),
        }
    }

    /// Byte range of the checksum field relative to the optional header
    pub fn checksum_range(&self) -> Range<usize> {
        match self {
            OptionalHeaderKind::Pe32 => span_of!(ImageOptionalHeader32, check_sum),
            OptionalHeaderKind::Pe32Plus => span_of!(ImageOptionalHeader64, check_sum),
        }
    }
}

#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy)]
pub struct ImageSectionHeader {
    pub name: [u8; IMAGE_SIZEOF_SHORT_NAME],
    pub virtual_size: u32,
    pub virtual_address: u32,
    pub size_of_raw_data: u32,
    pub pointer_to_raw_data: u32,
    pub pointer_to_relocations: u32,
    pub pointer_to_linenumbers: u32,
    pub number_of_relocations: u16,
    pub number_of_linenumbers: u16,
    pub characteristics: u32,
}

impl ImageSectionHeader {
    pub fn is_named(&self, name: &[u8; IMAGE_SIZEOF_SHORT_NAME]) -> bool {
        &self.name == name
    }

    pub fn is_writable_executable(&self) -> bool {
        let wx = IMAGE_SCN_MEM_WRITE | IMAGE_SCN_MEM_EXECUTE;
        self.characteristics & wx == wx
    }

    /// Section name up to the first NUL
    pub fn name_bytes(&self) -> &[u8] {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(IMAGE_SIZEOF_SHORT_NAME);
        &self.name[..end]
    }
}

/// Header of one entry in the certificate table
#[repr(C)]
#[derive(IntoBytes, FromBytes, Immutable, KnownLayout, Default, Debug, Clone, Copy)]
pub struct WinCertificateHeader {
    /// Length of the entry including this header
    pub length: u32,
    pub revision: u16,
    pub certificate_type: u16,
}

/// Digest algorithm
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
}

impl DigestAlgorithm {
    pub fn digest_size(&self) -> usize {
        match self {
            DigestAlgorithm::Sha1 => SHA1_DIGEST_BYTE_SIZE,
            DigestAlgorithm::Sha256 => SHA256_DIGEST_BYTE_SIZE,
        }
    }
}

/// One digest tagged with its algorithm
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ImageDigest {
    Sha1(Sha1Digest),
    Sha256(Sha256Digest),
}

impl ImageDigest {
    pub fn algorithm(&self) -> DigestAlgorithm {
        match self {
            ImageDigest::Sha1(_) => DigestAlgorithm::Sha1,
            ImageDigest::Sha256(_) => DigestAlgorithm::Sha256,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            ImageDigest::Sha1(d) => d,
            ImageDigest::Sha256(d) => d,
        }
    }
}

/// Authenticode digests of one image, computed in parallel
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Zeroize)]
pub struct ImageDigests {
    pub sha1: Sha1Digest,
    pub sha256: Sha256Digest,
}

impl ImageDigests {
    pub fn iter(&self) -> impl Iterator<Item = ImageDigest> {
        [ImageDigest::Sha1(self.sha1), ImageDigest::Sha256(self.sha256)].into_iter()
    }

    pub fn get(&self, algorithm: DigestAlgorithm) -> ImageDigest {
        match algorithm {
            DigestAlgorithm::Sha1 => ImageDigest::Sha1(self.sha1),
            DigestAlgorithm::Sha256 => ImageDigest::Sha256(self.sha256),
        }
    }
}
