/*++

Licensed under the Apache-2.0 license.

File Name:

   inspect.rs

Abstract:

    File contains implementation of the image inspection command.

--*/

use std::fmt::Write;
use std::path::PathBuf;

use anyhow::Context;
use bootgate_image_types::{ImageDigests, OptionalHeaderKind};
use bootgate_image_verify::{authenticode_regions, read_sbat_records, CertificateTable, ImageContext};
use clap::ArgMatches;
use sha2::Digest;

use crate::gate_error;

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let image_path: &PathBuf = args
        .get_one::<PathBuf>("image")
        .with_context(|| "image arg not specified")?;

    let image = std::fs::read(image_path)
        .with_context(|| format!("Failed to read image {}", image_path.display()))?;

    print!("{}", inspect_image(&image)?);
    Ok(())
}

/// Authenticode digests computed on the host
pub(crate) fn authenticode_digests(ctx: &ImageContext) -> anyhow::Result<ImageDigests> {
    let regions = authenticode_regions(ctx).map_err(gate_error)?;
    let mut sha1 = sha1::Sha1::new();
    let mut sha256 = sha2::Sha256::new();
    for region in regions {
        sha1.update(region);
        sha256.update(region);
    }
    Ok(ImageDigests {
        sha1: sha1.finalize().into(),
        sha256: sha256.finalize().into(),
    })
}

/// Render a human readable description of `image`
pub(crate) fn inspect_image(image: &[u8]) -> anyhow::Result<String> {
    let ctx = ImageContext::parse(image)
        .map_err(gate_error)
        .context("Image is not a valid PE/COFF image")?;
    let mut out = String::new();

    let format = match ctx.kind() {
        OptionalHeaderKind::Pe32 => "PE32",
        OptionalHeaderKind::Pe32Plus => "PE32+",
    };
    writeln!(out, "Format:      {format}")?;
    writeln!(out, "Machine:     0x{:04x}", ctx.machine())?;
    writeln!(out, "Entry point: 0x{:08x}", ctx.entry_point())?;
    writeln!(out, "Size:        0x{:x}", ctx.len())?;

    writeln!(out, "Sections:")?;
    for section in ctx.sections() {
        writeln!(
            out,
            "  {:<8} va 0x{:08x} raw 0x{:08x}+0x{:08x} flags 0x{:08x}",
            String::from_utf8_lossy(section.name_bytes()),
            section.virtual_address,
            section.pointer_to_raw_data,
            section.size_of_raw_data,
            section.characteristics
        )?;
    }

    let digests = authenticode_digests(&ctx)?;
    writeln!(out, "Authenticode SHA-1:   {}", hex::encode(digests.sha1))?;
    writeln!(out, "Authenticode SHA-256: {}", hex::encode(digests.sha256))?;

    writeln!(out, "Certificates:")?;
    for (idx, cert) in CertificateTable::from_context(&ctx).enumerate() {
        match cert {
            Ok(cert) => writeln!(
                out,
                "  #{idx} revision 0x{:04x} type 0x{:04x} len {}",
                cert.revision,
                cert.certificate_type,
                cert.data.len()
            )?,
            Err(err) => {
                writeln!(out, "  #{idx} malformed (0x{:08x})", u32::from(err))?;
                break;
            }
        }
    }

    writeln!(out, "SBAT:")?;
    match read_sbat_records(&ctx) {
        Ok(Some(records)) => {
            for record in records {
                writeln!(
                    out,
                    "  {} generation {} ({} {} {})",
                    record.component_name,
                    record.generation,
                    record.vendor_name,
                    record.vendor_package_name,
                    record.vendor_version
                )?;
            }
        }
        Ok(None) => writeln!(out, "  none")?,
        Err(err) => writeln!(out, "  invalid (0x{:08x})", u32::from(err))?,
    }

    Ok(out)
}
