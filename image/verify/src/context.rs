/*++

Licensed under the Apache-2.0 license.

File Name:

    context.rs

Abstract:

    Structural parser for PE/COFF images. Produces a fully validated view of
    the headers or an error; never a partially parsed image.

--*/

use core::ops::Range;

use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_types::*;
use zerocopy::{FromBytes, Immutable, KnownLayout};

/// Read a header structure at `offset`, failing with `err` if it does not fit
fn read_at<T: FromBytes + KnownLayout + Immutable>(
    image: &[u8],
    offset: usize,
    err: BootGateError,
) -> BootGateResult<T> {
    let tail = image.get(offset..).ok_or(err)?;
    T::read_from_prefix(tail).map(|(val, _)| val).map_err(|_| err)
}

fn checked_end(start: usize, len: usize) -> BootGateResult<usize> {
    start
        .checked_add(len)
        .ok_or(BootGateError::IMAGE_PARSE_ARITHMETIC_OVERFLOW)
}

/// Fields common to both optional header flavours
struct OptionalHeaderFields {
    address_of_entry_point: u32,
    section_alignment: u32,
    file_alignment: u32,
    size_of_image: u32,
    size_of_headers: u32,
    dll_characteristics: u16,
    number_of_rva_and_sizes: u32,
}

impl From<ImageOptionalHeader32> for OptionalHeaderFields {
    fn from(hdr: ImageOptionalHeader32) -> Self {
        Self {
            address_of_entry_point: hdr.address_of_entry_point,
            section_alignment: hdr.section_alignment,
            file_alignment: hdr.file_alignment,
            size_of_image: hdr.size_of_image,
            size_of_headers: hdr.size_of_headers,
            dll_characteristics: hdr.dll_characteristics,
            number_of_rva_and_sizes: hdr.number_of_rva_and_sizes,
        }
    }
}

impl From<ImageOptionalHeader64> for OptionalHeaderFields {
    fn from(hdr: ImageOptionalHeader64) -> Self {
        Self {
            address_of_entry_point: hdr.address_of_entry_point,
            section_alignment: hdr.section_alignment,
            file_alignment: hdr.file_alignment,
            size_of_image: hdr.size_of_image,
            size_of_headers: hdr.size_of_headers,
            dll_characteristics: hdr.dll_characteristics,
            number_of_rva_and_sizes: hdr.number_of_rva_and_sizes,
        }
    }
}

/// Parsed view of one candidate image. All offsets lie inside `image`.
#[derive(Debug, Clone)]
pub struct ImageContext<'a> {
    image: &'a [u8],
    kind: OptionalHeaderKind,
    machine: u16,
    checksum_offset: usize,
    security_dir_entry_offset: usize,
    size_of_headers: usize,
    size_of_image: u32,
    section_alignment: u32,
    file_alignment: u32,
    entry_point: u32,
    dll_characteristics: u16,
    section_table_offset: usize,
    section_count: usize,
    cert_dir: Option<Range<usize>>,
}

impl<'a> ImageContext<'a> {
    /// Parse the whole buffer
    pub fn parse(image: &'a [u8]) -> BootGateResult<Self> {
        Self::parse_with_size(image, image.len())
    }

    /// Parse the first `size` bytes of `buffer`
    ///
    /// # Arguments
    ///
    /// * `buffer` - Buffer holding the image
    /// * `size`   - Declared image size
    pub fn parse_with_size(buffer: &'a [u8], size: usize) -> BootGateResult<Self> {
        let image = buffer
            .get(..size)
            .ok_or(BootGateError::IMAGE_PARSE_SIZE_EXCEEDS_BUFFER)?;
        if image.is_empty() {
            return Err(BootGateError::IMAGE_PARSE_BUFFER_EMPTY);
        }

        let dos: ImageDosHeader =
            read_at(image, 0, BootGateError::IMAGE_PARSE_DOS_HEADER_TRUNCATED)?;
        if dos.e_magic != IMAGE_DOS_SIGNATURE {
            return Err(BootGateError::IMAGE_PARSE_DOS_SIGNATURE_MISMATCH);
        }

        let pe_offset = dos.e_lfanew as usize;
        if pe_offset < IMAGE_DOS_HEADER_BYTE_SIZE
            || checked_end(pe_offset, PE_SIGNATURE_BYTE_SIZE)? > image.len()
        {
            return Err(BootGateError::IMAGE_PARSE_PE_OFFSET_OUT_OF_BOUNDS);
        }
        let signature: u32 = read_at(
            image,
            pe_offset,
            BootGateError::IMAGE_PARSE_PE_OFFSET_OUT_OF_BOUNDS,
        )?;
        if signature != IMAGE_NT_SIGNATURE {
            return Err(BootGateError::IMAGE_PARSE_PE_SIGNATURE_MISMATCH);
        }

        let file_header_offset = pe_offset + PE_SIGNATURE_BYTE_SIZE;
        let file_header: ImageFileHeader = read_at(
            image,
            file_header_offset,
            BootGateError::IMAGE_PARSE_FILE_HEADER_TRUNCATED,
        )?;

        let oh_offset = checked_end(file_header_offset, IMAGE_FILE_HEADER_BYTE_SIZE)?;
        let truncated = BootGateError::IMAGE_PARSE_OPTIONAL_HEADER_TRUNCATED;
        let magic: u16 = read_at(image, oh_offset, truncated)?;
        let (kind, fields) = match magic {
            IMAGE_NT_OPTIONAL_HDR32_MAGIC => (
                OptionalHeaderKind::Pe32,
                OptionalHeaderFields::from(read_at::<ImageOptionalHeader32>(
                    image, oh_offset, truncated,
                )?),
            ),
            IMAGE_NT_OPTIONAL_HDR64_MAGIC => (
                OptionalHeaderKind::Pe32Plus,
                OptionalHeaderFields::from(read_at::<ImageOptionalHeader64>(
                    image, oh_offset, truncated,
                )?),
            ),
            _ => return Err(BootGateError::IMAGE_PARSE_OPTIONAL_HEADER_MAGIC_INVALID),
        };

        // The security directory must be one of the declared entries
        let dir_count = fields.number_of_rva_and_sizes;
        if dir_count > IMAGE_NUMBEROF_DIRECTORY_ENTRIES
            || dir_count <= IMAGE_DIRECTORY_ENTRY_SECURITY
        {
            return Err(BootGateError::IMAGE_PARSE_DATA_DIRECTORY_COUNT_INVALID);
        }
        let optional_header_size =
            kind.fixed_size() + dir_count as usize * IMAGE_DATA_DIRECTORY_BYTE_SIZE;
        if usize::from(file_header.size_of_optional_header) != optional_header_size {
            return Err(BootGateError::IMAGE_PARSE_OPTIONAL_HEADER_SIZE_MISMATCH);
        }
        let security_dir_entry_offset = oh_offset
            + kind.fixed_size()
            + IMAGE_DIRECTORY_ENTRY_SECURITY as usize * IMAGE_DATA_DIRECTORY_BYTE_SIZE;
        let security_dir: ImageDataDirectory =
            read_at(image, security_dir_entry_offset, truncated)?;

        let file_alignment = match fields.file_alignment {
            0 => DEFAULT_FILE_ALIGNMENT,
            val if val % 2 != 0 => return Err(BootGateError::IMAGE_PARSE_FILE_ALIGNMENT_INVALID),
            val => val,
        };
        let section_alignment = match fields.section_alignment {
            0 => DEFAULT_SECTION_ALIGNMENT,
            val => val,
        }
        .max(file_alignment);

        if file_header.characteristics & IMAGE_FILE_RELOCS_STRIPPED != 0 {
            return Err(BootGateError::IMAGE_PARSE_RELOCS_STRIPPED);
        }

        let section_count = usize::from(file_header.number_of_sections);
        if section_count == 0 {
            return Err(BootGateError::IMAGE_PARSE_SECTION_COUNT_INVALID);
        }
        let section_table_offset = checked_end(oh_offset, optional_header_size)?;
        let section_table_end = checked_end(
            section_table_offset,
            section_count
                .checked_mul(IMAGE_SECTION_HEADER_BYTE_SIZE)
                .ok_or(BootGateError::IMAGE_PARSE_ARITHMETIC_OVERFLOW)?,
        )?;
        if section_table_end > image.len() {
            return Err(BootGateError::IMAGE_PARSE_SECTION_TABLE_OVERFLOW);
        }

        let size_of_headers = fields.size_of_headers as usize;
        if size_of_headers > image.len() || fields.size_of_image < fields.size_of_headers {
            return Err(BootGateError::IMAGE_PARSE_HEADERS_SIZE_INVALID);
        }
        if section_table_end > size_of_headers {
            return Err(BootGateError::IMAGE_PARSE_SECTION_TABLE_OVERFLOW);
        }

        let mut context = Self {
            image,
            kind,
            machine: file_header.machine,
            checksum_offset: oh_offset + kind.checksum_offset(),
            security_dir_entry_offset,
            size_of_headers,
            size_of_image: fields.size_of_image,
            section_alignment,
            file_alignment,
            entry_point: fields.address_of_entry_point,
            dll_characteristics: fields.dll_characteristics,
            section_table_offset,
            section_count,
            cert_dir: None,
        };

        context.validate_sections()?;
        context.cert_dir = context.validate_cert_dir(&security_dir)?;
        Ok(context)
    }

    fn validate_sections(&self) -> BootGateResult<()> {
        let mut entry_hits = 0usize;
        let entry_point = u64::from(self.entry_point);
        for section in self.sections() {
            if section.size_of_raw_data != 0 {
                let start = section.pointer_to_raw_data as usize;
                let end = checked_end(start, section.size_of_raw_data as usize)?;
                if end > self.image.len() {
                    return Err(BootGateError::IMAGE_PARSE_SECTION_OUT_OF_BOUNDS);
                }
                if start < self.size_of_headers {
                    return Err(BootGateError::IMAGE_PARSE_SECTION_OVERLAPS_HEADERS);
                }
            }

            let span = match section.virtual_size {
                0 => section.size_of_raw_data,
                size => size,
            };
            let va = u64::from(section.virtual_address);
            if (va..va + u64::from(span)).contains(&entry_point) {
                entry_hits += 1;
            }
        }

        if entry_hits != 1 {
            return Err(BootGateError::IMAGE_PARSE_ENTRY_POINT_INVALID);
        }
        Ok(())
    }

    fn validate_cert_dir(&self, dir: &ImageDataDirectory) -> BootGateResult<Option<Range<usize>>> {
        if dir.is_empty() {
            return Ok(None);
        }
        let start = dir.virtual_address as usize;
        let end = checked_end(start, dir.size as usize)?;
        if end > self.image.len() {
            return Err(BootGateError::IMAGE_PARSE_CERT_DIR_OUT_OF_BOUNDS);
        }
        if start < self.size_of_headers {
            return Err(BootGateError::IMAGE_PARSE_CERT_DIR_OVERLAPS_HEADERS);
        }
        // Bytes after the table would be loaded without being hashed
        if end != self.image.len() {
            return Err(BootGateError::IMAGE_PARSE_CERT_DIR_NOT_AT_END);
        }
        Ok(Some(start..end))
    }

    /// Image bytes the context was parsed from
    pub fn image(&self) -> &'a [u8] {
        self.image
    }

    pub fn len(&self) -> usize {
        self.image.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image.is_empty()
    }

    pub fn kind(&self) -> OptionalHeaderKind {
        self.kind
    }

    pub fn machine(&self) -> u16 {
        self.machine
    }

    pub fn checksum_offset(&self) -> usize {
        self.checksum_offset
    }

    pub fn security_dir_entry_offset(&self) -> usize {
        self.security_dir_entry_offset
    }

    pub fn size_of_headers(&self) -> usize {
        self.size_of_headers
    }

    pub fn size_of_image(&self) -> u32 {
        self.size_of_image
    }

    pub fn section_alignment(&self) -> u32 {
        self.section_alignment
    }

    pub fn file_alignment(&self) -> u32 {
        self.file_alignment
    }

    pub fn entry_point(&self) -> u32 {
        self.entry_point
    }

    pub fn dll_characteristics(&self) -> u16 {
        self.dll_characteristics
    }

    pub fn section_table_offset(&self) -> usize {
        self.section_table_offset
    }

    pub fn section_count(&self) -> usize {
        self.section_count
    }

    /// File range of the certificate table, if the image has one
    pub fn cert_dir(&self) -> Option<Range<usize>> {
        self.cert_dir.clone()
    }

    /// Section headers in table order
    pub fn sections(&self) -> impl Iterator<Item = ImageSectionHeader> + 'a {
        let start = self.section_table_offset;
        let end = start + self.section_count * IMAGE_SECTION_HEADER_BYTE_SIZE;
        self.image
            .get(start..end)
            .unwrap_or_default()
            .chunks_exact(IMAGE_SECTION_HEADER_BYTE_SIZE)
            .filter_map(|chunk| ImageSectionHeader::read_from_bytes(chunk).ok())
    }

    /// Sections whose name matches `name` exactly
    pub fn find_sections(
        &self,
        name: [u8; IMAGE_SIZEOF_SHORT_NAME],
    ) -> impl Iterator<Item = ImageSectionHeader> + 'a {
        self.sections().filter(move |s| s.is_named(&name))
    }

    /// Raw data of a section from this image's table
    pub fn section_data(&self, section: &ImageSectionHeader) -> &'a [u8] {
        let start = section.pointer_to_raw_data as usize;
        let end = start.saturating_add(section.size_of_raw_data as usize);
        if section.size_of_raw_data == 0 {
            return &[];
        }
        self.image.get(start..end).unwrap_or_default()
    }

    /// Reject images that are not NX compatible or map W+X sections
    pub fn check_nx_policy(&self) -> BootGateResult<()> {
        if self.dll_characteristics & IMAGE_DLLCHARACTERISTICS_NX_COMPAT == 0 {
            return Err(BootGateError::IMAGE_POLICY_NX_COMPAT_REQUIRED);
        }
        if self.sections().any(|s| s.is_writable_executable()) {
            return Err(BootGateError::IMAGE_POLICY_WRITABLE_EXECUTABLE_SECTION);
        }
        Ok(())
    }
}
