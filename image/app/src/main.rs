/*++

Licensed under the Apache-2.0 license.

File Name:

   main.rs

Abstract:

    Main entry point of the boot gate host tool

--*/
use std::path::PathBuf;

use bootgate_error::BootGateError;
use clap::{arg, value_parser, Command};

mod inspect;
mod policy;

/// Wrap a boot gate error code for reporting
pub(crate) fn gate_error(err: BootGateError) -> anyhow::Error {
    anyhow::anyhow!("boot gate error 0x{:08x}", u32::from(err))
}

/// Entry point
fn main() {
    let sub_cmds = vec![
        Command::new("inspect")
            .about("Print the structure, Authenticode digests and SBAT data of a PE image")
            .arg(
                arg!(--"image" <FILE> "PE/COFF image")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            ),
        Command::new("policy")
            .about("Build persisted trust list and revocation blobs")
            .arg(
                arg!(--"config" <FILE> "Policy configuration file")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            )
            .arg(
                arg!(--"out-dir" <DIR> "Output directory")
                    .required(true)
                    .value_parser(value_parser!(PathBuf)),
            ),
    ];

    let cmd = Command::new("bootgate-image-app")
        .arg_required_else_help(true)
        .subcommands(sub_cmds)
        .about("Boot gate imaging tools")
        .get_matches();

    let result = match cmd.subcommand() {
        Some(("inspect", args)) => inspect::run_cmd(args),
        Some(("policy", args)) => policy::run_cmd(args),
        _ => unreachable!(),
    };

    if let Err(err) = result {
        eprintln!("Error: {err:#}");
        std::process::exit(-1);
    }
}
