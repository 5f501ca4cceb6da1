/*++

Licensed under the Apache-2.0 license.

File Name:

   generator.rs

Abstract:

    Synthetic PE/COFF image generator

--*/
use std::ops::Range;

use bootgate_image_types::*;
use sha2::Digest;
use zerocopy::IntoBytes;

use crate::fake_signed_data;

const PE_OFFSET: usize = 0x80;
const FILE_ALIGNMENT: usize = DEFAULT_FILE_ALIGNMENT as usize;
const SECTION_ALIGNMENT: usize = DEFAULT_SECTION_ALIGNMENT as usize;
const IMAGE_FILE_EXECUTABLE_IMAGE: u16 = 0x0002;
const IMAGE_SCN_CNT_CODE: u32 = 0x0000_0020;
const IMAGE_SCN_CNT_INITIALIZED_DATA: u32 = 0x0000_0040;
const IMAGE_SCN_MEM_READ: u32 = 0x4000_0000;

pub const TEXT_CHARACTERISTICS: u32 =
    IMAGE_SCN_CNT_CODE | IMAGE_SCN_MEM_READ | IMAGE_SCN_MEM_EXECUTE;
pub const DATA_CHARACTERISTICS: u32 = IMAGE_SCN_CNT_INITIALIZED_DATA | IMAGE_SCN_MEM_READ;

fn align_up(val: usize, align: usize) -> usize {
    val.div_ceil(align) * align
}

struct SectionSpec {
    name: [u8; IMAGE_SIZEOF_SHORT_NAME],
    data: Vec<u8>,
    virtual_size: Option<u32>,
    characteristics: u32,
    relocations: u16,
}

/// Who signs the image and how
#[derive(Clone)]
pub struct Signer {
    pub cert: Vec<u8>,
    pub module_signing_eku: bool,
    /// Indirect data holds the SHA-1 image digest instead of SHA-256
    pub sha1_indirect_data: bool,
    /// Sign this digest instead of the image's own
    pub digest_override: Option<ImageDigest>,
}

impl Signer {
    pub fn new(cert: &[u8]) -> Self {
        Self {
            cert: cert.to_vec(),
            module_signing_eku: false,
            sha1_indirect_data: false,
            digest_override: None,
        }
    }

    /// Legacy signer whose indirect data carries the SHA-1 digest
    pub fn sha1(cert: &[u8]) -> Self {
        Self {
            sha1_indirect_data: true,
            ..Self::new(cert)
        }
    }

    fn indirect_digest(&self, digests: &ImageDigests) -> ImageDigest {
        match self.digest_override {
            Some(digest) => digest,
            None if self.sha1_indirect_data => ImageDigest::Sha1(digests.sha1),
            None => ImageDigest::Sha256(digests.sha256),
        }
    }
}

enum CertEntrySpec {
    Signed(Signer),
    Raw { cert_type: u16, blob: Vec<u8> },
}

impl CertEntrySpec {
    fn blob_len(&self) -> usize {
        match self {
            // magic, flags, digest algorithm, length, cert, digest
            CertEntrySpec::Signed(s) => {
                let digest = s.indirect_digest(&ImageDigests::default());
                8 + 4 + 4 + 4 + s.cert.len() + digest.algorithm().digest_size()
            }
            CertEntrySpec::Raw { blob, .. } => blob.len(),
        }
    }
}

/// Offsets of the interesting fields in a generated image
#[derive(Debug, Clone, Default)]
pub struct PeLayout {
    pub pe_offset: usize,
    pub file_header_offset: usize,
    pub optional_header_offset: usize,
    pub checksum_offset: usize,
    pub security_dir_entry_offset: usize,
    pub section_table_offset: usize,
    pub size_of_headers: usize,
    pub sections: Vec<Range<usize>>,
    pub cert_table: Option<Range<usize>>,
}

/// A generated image
#[derive(Debug, Clone)]
pub struct PeImage {
    pub bytes: Vec<u8>,
    pub layout: PeLayout,
}

impl PeImage {
    /// Reference Authenticode digests. Generated images have contiguous
    /// sections, so everything before the certificate table minus the two
    /// holes is hashed.
    pub fn authenticode_digests(&self) -> ImageDigests {
        reference_digests(&self.bytes, &self.layout)
    }
}

fn reference_digests(bytes: &[u8], layout: &PeLayout) -> ImageDigests {
    let end = layout
        .cert_table
        .as_ref()
        .map(|r| r.start)
        .unwrap_or(bytes.len());
    let regions = [
        &bytes[..layout.checksum_offset],
        &bytes[layout.checksum_offset + 4..layout.security_dir_entry_offset],
        &bytes[layout.security_dir_entry_offset + IMAGE_DATA_DIRECTORY_BYTE_SIZE..end],
    ];
    let mut sha1 = sha1::Sha1::new();
    let mut sha256 = sha2::Sha256::new();
    for region in regions {
        sha1.update(region);
        sha256.update(region);
    }
    ImageDigests {
        sha1: sha1.finalize().into(),
        sha256: sha256.finalize().into(),
    }
}

/// Builds PE32+ (default) or PE32 images with optional SBAT data and
/// certificate table
pub struct PeImageBuilder {
    kind: OptionalHeaderKind,
    sections: Vec<SectionSpec>,
    cert_entries: Vec<CertEntrySpec>,
    entry_point: Option<u32>,
    dll_characteristics: u16,
    file_characteristics: u16,
    checksum: u32,
    body_size: Option<usize>,
    total_size: Option<usize>,
}

impl Default for PeImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PeImageBuilder {
    pub fn new() -> Self {
        Self {
            kind: OptionalHeaderKind::Pe32Plus,
            sections: Vec::new(),
            cert_entries: Vec::new(),
            entry_point: None,
            dll_characteristics: IMAGE_DLLCHARACTERISTICS_NX_COMPAT,
            file_characteristics: IMAGE_FILE_EXECUTABLE_IMAGE,
            checksum: 0,
            body_size: None,
            total_size: None,
        }
    }

    /// Image with a single code section
    pub fn with_text() -> Self {
        Self::new().section(".text", &[0xC3; 0x300], TEXT_CHARACTERISTICS)
    }

    pub fn pe32(mut self) -> Self {
        self.kind = OptionalHeaderKind::Pe32;
        self
    }

    pub fn section(mut self, name: &str, data: &[u8], characteristics: u32) -> Self {
        let mut n = [0u8; IMAGE_SIZEOF_SHORT_NAME];
        let len = name.len().min(IMAGE_SIZEOF_SHORT_NAME);
        n[..len].copy_from_slice(&name.as_bytes()[..len]);
        self.sections.push(SectionSpec {
            name: n,
            data: data.to_vec(),
            virtual_size: None,
            characteristics,
            relocations: 0,
        });
        self
    }

    /// Override the virtual size of the last added section
    pub fn virtual_size(mut self, size: u32) -> Self {
        if let Some(s) = self.sections.last_mut() {
            s.virtual_size = Some(size);
        }
        self
    }

    /// Set the relocation count of the last added section
    pub fn relocations(mut self, count: u16) -> Self {
        if let Some(s) = self.sections.last_mut() {
            s.relocations = count;
        }
        self
    }

    pub fn sbat(self, csv: &str) -> Self {
        self.section(".sbat", csv.as_bytes(), DATA_CHARACTERISTICS)
    }

    pub fn signed_by(self, cert: &[u8]) -> Self {
        self.signer(Signer::new(cert))
    }

    pub fn signer(mut self, signer: Signer) -> Self {
        self.cert_entries.push(CertEntrySpec::Signed(signer));
        self
    }

    pub fn raw_certificate(mut self, cert_type: u16, blob: &[u8]) -> Self {
        self.cert_entries.push(CertEntrySpec::Raw {
            cert_type,
            blob: blob.to_vec(),
        });
        self
    }

    pub fn entry_point(mut self, rva: u32) -> Self {
        self.entry_point = Some(rva);
        self
    }

    pub fn dll_characteristics(mut self, val: u16) -> Self {
        self.dll_characteristics = val;
        self
    }

    pub fn file_characteristics(mut self, val: u16) -> Self {
        self.file_characteristics = val;
        self
    }

    pub fn checksum(mut self, val: u32) -> Self {
        self.checksum = val;
        self
    }

    /// Pad the hashed part of the image with trailing zeros up to `size`
    pub fn body_size(mut self, size: usize) -> Self {
        self.body_size = Some(size);
        self
    }

    /// Pad so that the whole file, certificate table included, is `size`
    pub fn total_size(mut self, size: usize) -> Self {
        self.total_size = Some(size);
        self
    }

    pub fn build(&self) -> Vec<u8> {
        self.build_image().bytes
    }

    pub fn build_image(&self) -> PeImage {
        let mut layout = PeLayout {
            pe_offset: PE_OFFSET,
            file_header_offset: PE_OFFSET + PE_SIGNATURE_BYTE_SIZE,
            ..Default::default()
        };
        layout.optional_header_offset = layout.file_header_offset + IMAGE_FILE_HEADER_BYTE_SIZE;
        let dir_offset = layout.optional_header_offset + self.kind.fixed_size();
        layout.checksum_offset = layout.optional_header_offset + self.kind.checksum_offset();
        layout.security_dir_entry_offset =
            dir_offset + IMAGE_DIRECTORY_ENTRY_SECURITY as usize * IMAGE_DATA_DIRECTORY_BYTE_SIZE;
        let size_of_optional_header = self.kind.fixed_size()
            + IMAGE_NUMBEROF_DIRECTORY_ENTRIES as usize * IMAGE_DATA_DIRECTORY_BYTE_SIZE;
        layout.section_table_offset = layout.optional_header_offset + size_of_optional_header;
        layout.size_of_headers = align_up(
            layout.section_table_offset + self.sections.len() * IMAGE_SECTION_HEADER_BYTE_SIZE,
            FILE_ALIGNMENT,
        );

        // Section raw data and headers
        let mut body = vec![0u8; layout.size_of_headers];
        let mut headers = Vec::new();
        let mut va = SECTION_ALIGNMENT;
        for spec in &self.sections {
            let raw_size = align_up(spec.data.len(), FILE_ALIGNMENT);
            let pointer = if raw_size == 0 { 0 } else { body.len() };
            let virtual_size = spec.virtual_size.unwrap_or(spec.data.len() as u32);
            headers.push(ImageSectionHeader {
                name: spec.name,
                virtual_size,
                virtual_address: va as u32,
                size_of_raw_data: raw_size as u32,
                pointer_to_raw_data: pointer as u32,
                number_of_relocations: spec.relocations,
                characteristics: spec.characteristics,
                ..Default::default()
            });
            if raw_size != 0 {
                layout.sections.push(pointer..pointer + raw_size);
                body.extend_from_slice(&spec.data);
                body.resize(pointer + raw_size, 0);
            }
            va = align_up(va + (virtual_size as usize).max(raw_size).max(1), SECTION_ALIGNMENT);
        }
        let size_of_image = va;

        // Certificate table sizing
        let table_len: usize = self
            .cert_entries
            .iter()
            .map(|e| align_up(WIN_CERTIFICATE_HEADER_BYTE_SIZE + e.blob_len(), WIN_CERT_ALIGNMENT))
            .sum();
        let mut body_len = align_up(body.len(), WIN_CERT_ALIGNMENT);
        if let Some(size) = self.body_size {
            body_len = body_len.max(size);
        }
        if let Some(size) = self.total_size {
            body_len = body_len.max(size.saturating_sub(table_len));
        }
        body.resize(body_len, 0);

        // Headers
        let dos = ImageDosHeader {
            e_magic: IMAGE_DOS_SIGNATURE,
            e_lfanew: PE_OFFSET as u32,
            ..Default::default()
        };
        body[..IMAGE_DOS_HEADER_BYTE_SIZE].copy_from_slice(dos.as_bytes());
        body[PE_OFFSET..PE_OFFSET + 4].copy_from_slice(&IMAGE_NT_SIGNATURE.to_le_bytes());

        let file_header = ImageFileHeader {
            machine: match self.kind {
                OptionalHeaderKind::Pe32 => 0x014c,
                OptionalHeaderKind::Pe32Plus => 0x8664,
            },
            number_of_sections: self.sections.len() as u16,
            size_of_optional_header: size_of_optional_header as u16,
            characteristics: self.file_characteristics,
            ..Default::default()
        };
        let fh = layout.file_header_offset;
        body[fh..fh + IMAGE_FILE_HEADER_BYTE_SIZE].copy_from_slice(file_header.as_bytes());

        let entry_point = self
            .entry_point
            .unwrap_or_else(|| headers.first().map(|h| h.virtual_address).unwrap_or(0));
        let oh = layout.optional_header_offset;
        match self.kind {
            OptionalHeaderKind::Pe32 => {
                let hdr = ImageOptionalHeader32 {
                    magic: IMAGE_NT_OPTIONAL_HDR32_MAGIC,
                    address_of_entry_point: entry_point,
                    image_base: 0x40_0000,
                    section_alignment: SECTION_ALIGNMENT as u32,
                    file_alignment: FILE_ALIGNMENT as u32,
                    size_of_image: size_of_image as u32,
                    size_of_headers: layout.size_of_headers as u32,
                    check_sum: self.checksum,
                    subsystem: 10,
                    dll_characteristics: self.dll_characteristics,
                    number_of_rva_and_sizes: IMAGE_NUMBEROF_DIRECTORY_ENTRIES,
                    ..Default::default()
                };
                body[oh..oh + self.kind.fixed_size()].copy_from_slice(hdr.as_bytes());
            }
            OptionalHeaderKind::Pe32Plus => {
                let hdr = ImageOptionalHeader64 {
                    magic: IMAGE_NT_OPTIONAL_HDR64_MAGIC,
                    address_of_entry_point: entry_point,
                    image_base: 0x1_4000_0000,
                    section_alignment: SECTION_ALIGNMENT as u32,
                    file_alignment: FILE_ALIGNMENT as u32,
                    size_of_image: size_of_image as u32,
                    size_of_headers: layout.size_of_headers as u32,
                    check_sum: self.checksum,
                    subsystem: 10,
                    dll_characteristics: self.dll_characteristics,
                    number_of_rva_and_sizes: IMAGE_NUMBEROF_DIRECTORY_ENTRIES,
                    ..Default::default()
                };
                body[oh..oh + self.kind.fixed_size()].copy_from_slice(hdr.as_bytes());
            }
        }

        for (i, hdr) in headers.iter().enumerate() {
            let off = layout.section_table_offset + i * IMAGE_SECTION_HEADER_BYTE_SIZE;
            body[off..off + IMAGE_SECTION_HEADER_BYTE_SIZE].copy_from_slice(hdr.as_bytes());
        }

        if table_len != 0 {
            let start = body.len();
            layout.cert_table = Some(start..start + table_len);
            let dir = ImageDataDirectory {
                virtual_address: start as u32,
                size: table_len as u32,
            };
            let sd = layout.security_dir_entry_offset;
            body[sd..sd + IMAGE_DATA_DIRECTORY_BYTE_SIZE].copy_from_slice(dir.as_bytes());
        }

        // The digest does not cover the certificate table, so it can be
        // computed before the table is appended.
        let digests = reference_digests(&body, &layout);
        for entry in &self.cert_entries {
            let (cert_type, blob) = match entry {
                CertEntrySpec::Signed(signer) => (
                    WIN_CERT_TYPE_PKCS_SIGNED_DATA,
                    fake_signed_data(
                        &signer.cert,
                        &signer.indirect_digest(&digests),
                        signer.module_signing_eku,
                    ),
                ),
                CertEntrySpec::Raw { cert_type, blob } => (*cert_type, blob.clone()),
            };
            let header = WinCertificateHeader {
                length: (WIN_CERTIFICATE_HEADER_BYTE_SIZE + blob.len()) as u32,
                revision: WIN_CERT_REVISION_2_0,
                certificate_type: cert_type,
            };
            body.extend_from_slice(header.as_bytes());
            body.extend_from_slice(&blob);
            body.resize(align_up(body.len(), WIN_CERT_ALIGNMENT), 0);
        }

        PeImage {
            bytes: body,
            layout,
        }
    }
}
