/*++

Licensed under the Apache-2.0 license.

File Name:

    sbat.rs

Abstract:

    SBAT component generation metadata and the revocation policy it is
    checked against.

--*/

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use bootgate_drivers::cprintln;
use bootgate_drivers::persistent::{RevocationEntry, RevocationList, REVOCATION_NAME_MAX_SIZE};
use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_types::SBAT_SECTION_NAME;

use crate::ImageContext;

const SBAT_RECORD_FIELD_COUNT: usize = 6;
const UTF8_BOM: &str = "\u{feff}";

/// One row of an image's `.sbat` section
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SbatRecord<'a> {
    pub component_name: &'a str,
    pub generation: u32,
    pub vendor_name: &'a str,
    pub vendor_package_name: &'a str,
    pub vendor_version: &'a str,
    pub vendor_url: &'a str,
}

fn valid_component_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= REVOCATION_NAME_MAX_SIZE
        && name.bytes().all(|c| c.is_ascii_graphic())
}

fn parse_generation(field: &str) -> Option<u32> {
    if field.is_empty() || !field.bytes().all(|c| c.is_ascii_digit()) {
        return None;
    }
    field.parse().ok()
}

/// Parse the newline terminated CSV records of a `.sbat` section
pub fn parse_sbat_records(data: &[u8]) -> BootGateResult<Vec<SbatRecord<'_>>> {
    let text = core::str::from_utf8(data).map_err(|_| BootGateError::IMAGE_SBAT_NOT_TEXT)?;

    let mut lines: Vec<&str> = text.split('\n').collect();
    // Everything after the last terminator must be empty
    if lines.pop().is_some_and(|tail| !tail.is_empty()) {
        return Err(BootGateError::IMAGE_SBAT_RECORD_UNTERMINATED);
    }

    let mut records = Vec::with_capacity(lines.len());
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        let fields = <[&str; SBAT_RECORD_FIELD_COUNT]>::try_from(fields)
            .map_err(|_| BootGateError::IMAGE_SBAT_RECORD_FIELD_COUNT)?;
        let [component_name, generation, vendor_name, vendor_package_name, vendor_version, vendor_url] =
            fields;
        if !valid_component_name(component_name) {
            return Err(BootGateError::IMAGE_SBAT_NAME_INVALID);
        }
        let generation =
            parse_generation(generation).ok_or(BootGateError::IMAGE_SBAT_GENERATION_INVALID)?;
        records.push(SbatRecord {
            component_name,
            generation,
            vendor_name,
            vendor_package_name,
            vendor_version,
            vendor_url,
        });
    }

    if records.is_empty() {
        return Err(BootGateError::IMAGE_SBAT_EMPTY);
    }
    Ok(records)
}

/// Locate the `.sbat` section and return its content without NUL padding.
///
/// A section whose raw data is shorter than its virtual size is not used.
pub fn find_sbat_section<'a>(ctx: &ImageContext<'a>) -> BootGateResult<Option<&'a [u8]>> {
    let mut sections = ctx.find_sections(SBAT_SECTION_NAME);
    let Some(section) = sections.next() else {
        return Ok(None);
    };
    if sections.next().is_some() {
        return Err(BootGateError::IMAGE_SBAT_MULTIPLE_SECTIONS);
    }
    if section.number_of_relocations != 0 {
        return Err(BootGateError::IMAGE_SBAT_SECTION_RELOCATED);
    }
    if section.size_of_raw_data < section.virtual_size {
        cprintln!("[sbat] .sbat raw data shorter than its virtual size, ignored");
        return Ok(None);
    }

    let len = match section.virtual_size {
        0 => section.size_of_raw_data,
        size => size,
    } as usize;
    let data = ctx
        .section_data(&section)
        .get(..len)
        .ok_or(BootGateError::IMAGE_SBAT_SECTION_OUT_OF_BOUNDS)?;
    let end = data.iter().rposition(|&b| b != 0).map_or(0, |pos| pos + 1);
    Ok(Some(&data[..end]))
}

/// Parsed SBAT records of an image, `None` when it has no usable section
pub fn read_sbat_records<'a>(
    ctx: &ImageContext<'a>,
) -> BootGateResult<Option<Vec<SbatRecord<'a>>>> {
    match find_sbat_section(ctx)? {
        Some(data) => parse_sbat_records(data).map(Some),
        None => Ok(None),
    }
}

/// Minimum acceptable generation per component
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct RevocationPolicy {
    minimums: BTreeMap<String, u32>,
}

impl RevocationPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse the text form: `name,generation[,comment]` lines, optionally
    /// preceded by a UTF-8 byte order mark. Blank lines are ignored.
    pub fn from_text(text: &str) -> BootGateResult<Self> {
        let text = text.strip_prefix(UTF8_BOM).unwrap_or(text);
        let mut policy = Self::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.split(',');
            let name = fields.next().unwrap_or_default();
            let generation = fields
                .next()
                .and_then(parse_generation)
                .ok_or(BootGateError::SBAT_POLICY_TEXT_INVALID)?;
            if !valid_component_name(name) {
                return Err(BootGateError::SBAT_POLICY_TEXT_INVALID);
            }
            policy.raise(name, generation);
        }
        Ok(policy)
    }

    pub fn from_text_bytes(data: &[u8]) -> BootGateResult<Self> {
        let text =
            core::str::from_utf8(data).map_err(|_| BootGateError::SBAT_POLICY_TEXT_INVALID)?;
        Self::from_text(text)
    }

    /// Raise the minimum for `name`. Lower values are ignored. Returns
    /// whether the effective minimum changed.
    pub fn raise(&mut self, name: &str, generation: u32) -> bool {
        match self.minimums.get_mut(name) {
            Some(min) if *min >= generation => false,
            Some(min) => {
                *min = generation;
                true
            }
            None => {
                self.minimums.insert(String::from(name), generation);
                true
            }
        }
    }

    /// Merge the persisted override, keeping the larger minimum per component
    pub fn merge_override(&mut self, list: &RevocationList) {
        for entry in &list.entries {
            self.raise(&entry.name, entry.generation);
        }
    }

    pub fn effective_minimum(&self, name: &str) -> Option<u32> {
        self.minimums.get(name).copied()
    }

    /// Images without SBAT data cannot satisfy a non-zero minimum
    pub fn requires_sbat(&self) -> bool {
        self.minimums.values().any(|&min| min >= 1)
    }

    pub fn is_empty(&self) -> bool {
        self.minimums.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.minimums.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Persistable form, components in name order
    pub fn to_revocation_list(&self) -> RevocationList {
        RevocationList::new(
            self.iter()
                .map(|(name, generation)| RevocationEntry::new(name, generation))
                .collect(),
        )
    }
}

/// Compare declared generations against the policy.
///
/// `records` is `None` for an image without SBAT data, which only passes an
/// empty (all zero) policy.
pub fn check_revocation(
    records: Option<&[SbatRecord]>,
    policy: &RevocationPolicy,
) -> BootGateResult<()> {
    let Some(records) = records else {
        if policy.requires_sbat() {
            cprintln!("[sbat] Image has no SBAT data");
            return Err(BootGateError::SBAT_SECTION_MISSING);
        }
        return Ok(());
    };

    for record in records {
        if let Some(min) = policy.effective_minimum(record.component_name) {
            if record.generation < min {
                cprintln!(
                    "[sbat] {} generation {} is revoked, minimum {}",
                    record.component_name,
                    record.generation,
                    min
                );
                return Err(BootGateError::SBAT_GENERATION_REVOKED);
            }
        }
    }
    Ok(())
}
