/*++

Licensed under the Apache-2.0 license.

File Name:

    digest.rs

Abstract:

    Authenticode digest regions of a parsed image.

--*/

use alloc::vec::Vec;

use bootgate_error::{BootGateError, BootGateResult};
use bootgate_image_types::{ImageDigests, IMAGE_DATA_DIRECTORY_BYTE_SIZE};

use crate::{ImageContext, ImageVerificationEnv};

fn region<'a>(image: &'a [u8], start: usize, end: usize) -> BootGateResult<&'a [u8]> {
    image
        .get(start..end)
        .ok_or(BootGateError::IMAGE_DIGEST_REGION_OUT_OF_BOUNDS)
}

/// Byte regions covered by the Authenticode digest, in hashing order.
///
/// The checksum field and the security directory entry are skipped in the
/// headers; sections follow in file order, then any bytes between the last
/// section and the certificate table. The certificate table itself is never
/// covered, whether or not the image has one.
pub fn authenticode_regions<'a>(ctx: &ImageContext<'a>) -> BootGateResult<Vec<&'a [u8]>> {
    let image = ctx.image();
    let checksum = ctx.checksum_offset();
    let secdir = ctx.security_dir_entry_offset();

    let mut regions = Vec::with_capacity(ctx.section_count() + 4);
    regions.push(region(image, 0, checksum)?);
    regions.push(region(image, checksum + 4, secdir)?);
    regions.push(region(
        image,
        secdir + IMAGE_DATA_DIRECTORY_BYTE_SIZE,
        ctx.size_of_headers(),
    )?);

    let mut sections: Vec<(usize, usize)> = ctx
        .sections()
        .filter(|s| s.size_of_raw_data != 0)
        .map(|s| (s.pointer_to_raw_data as usize, s.size_of_raw_data as usize))
        .collect();
    sections.sort_unstable();

    let hashable_end = match ctx.cert_dir() {
        Some(cert) => cert.start,
        None => image.len(),
    };
    let mut hashed_end = ctx.size_of_headers();
    for (start, size) in sections {
        let end = start
            .checked_add(size)
            .ok_or(BootGateError::IMAGE_DIGEST_REGION_OUT_OF_BOUNDS)?;
        if end > hashable_end {
            return Err(BootGateError::IMAGE_DIGEST_TRAILING_DATA_INVALID);
        }
        regions.push(region(image, start, end)?);
        hashed_end = hashed_end.max(end);
    }

    if hashed_end < hashable_end {
        regions.push(region(image, hashed_end, hashable_end)?);
    }
    Ok(regions)
}

/// SHA-1 and SHA-256 Authenticode digests of the image
pub fn compute_digests<Env: ImageVerificationEnv>(
    env: &mut Env,
    ctx: &ImageContext,
) -> BootGateResult<ImageDigests> {
    let regions = authenticode_regions(ctx)?;
    env.image_digests(&regions)
}
