/*++

Licensed under the Apache-2.0 license.

File Name:

   mod.rs

Abstract:

    File contains implementation of the policy blob creation command.

--*/

mod config;

use anyhow::{anyhow, Context};
use bootgate_drivers::persistent::{is_der_certificate, TrustEntry, TrustList};
use bootgate_drivers::VariableName;
use bootgate_image_verify::{PolicyFlags, RevocationPolicy};
use clap::ArgMatches;
use std::path::{Path, PathBuf};

use crate::gate_error;
use config::{PolicyConfig, TrustListConfig};

/// Run the command
pub(crate) fn run_cmd(args: &ArgMatches) -> anyhow::Result<()> {
    let config_path: &PathBuf = args
        .get_one::<PathBuf>("config")
        .with_context(|| "config arg not specified")?;

    let out_dir: &PathBuf = args
        .get_one::<PathBuf>("out-dir")
        .with_context(|| "out-dir arg not specified")?;

    let config = config::load_policy_config(config_path)?;
    let config_dir = config_path
        .parent()
        .with_context(|| "Invalid parent path")?;

    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create directory {}", out_dir.display()))?;

    for (name, blob) in build_blobs(&config, config_dir)? {
        let out_path = out_dir.join(format!("{}.bin", name.as_str()));
        std::fs::write(&out_path, &blob)
            .with_context(|| format!("Failed to write file {}", out_path.display()))?;
        println!("{}: {} bytes", out_path.display(), blob.len());
    }
    Ok(())
}

/// Encode every variable the configuration describes
fn build_blobs(config: &PolicyConfig, dir: &Path) -> anyhow::Result<Vec<(VariableName, Vec<u8>)>> {
    let mut blobs = Vec::new();

    let lists = [
        (VariableName::PlatformDb, &config.db),
        (VariableName::PlatformDbx, &config.dbx),
        (VariableName::MokList, &config.mok_list),
        (VariableName::MokListX, &config.mok_list_x),
    ];
    for (name, list) in lists {
        if let Some(list) = list {
            let blob = trust_list(list, dir)?
                .encode()
                .map_err(gate_error)
                .with_context(|| format!("Failed to encode {}", name.as_str()))?;
            blobs.push((name, blob));
        }
    }

    if !config.revocation.is_empty() {
        let mut policy = RevocationPolicy::new();
        for entry in &config.revocation {
            policy.raise(&entry.name, entry.generation);
        }
        let blob = policy
            .to_revocation_list()
            .encode()
            .map_err(gate_error)
            .context("Failed to encode revocation minimums")?;
        blobs.push((VariableName::SbatLevel, blob));
    }

    if let Some(names) = &config.flags {
        let flags = policy_flags(names)?;
        blobs.push((VariableName::PolicyFlags, flags.bits().to_le_bytes().to_vec()));
    }

    Ok(blobs)
}

fn trust_list(config: &TrustListConfig, dir: &Path) -> anyhow::Result<TrustList> {
    let mut entries = Vec::new();
    for digest in &config.sha1 {
        entries.push(TrustEntry::Sha1(decode_digest(digest)?));
    }
    for digest in &config.sha256 {
        entries.push(TrustEntry::Sha256(decode_digest(digest)?));
    }
    for cert in &config.certs {
        let path = dir.join(cert);
        let der = std::fs::read(&path)
            .with_context(|| format!("Failed to read certificate {}", path.display()))?;
        if !is_der_certificate(&der) {
            return Err(anyhow!("{} is not a DER certificate", path.display()));
        }
        entries.push(TrustEntry::X509(der));
    }
    Ok(TrustList::new(entries))
}

fn decode_digest<const N: usize>(digest: &str) -> anyhow::Result<[u8; N]> {
    let bytes = hex::decode(digest).with_context(|| format!("Invalid digest {digest}"))?;
    bytes
        .try_into()
        .map_err(|_| anyhow!("Digest {digest} is not {N} bytes"))
}

fn policy_flags(names: &[String]) -> anyhow::Result<PolicyFlags> {
    let mut flags = PolicyFlags::empty();
    for name in names {
        flags |= match name.as_str() {
            "ignore-platform-db" => PolicyFlags::IGNORE_PLATFORM_DB,
            "require-nx" => PolicyFlags::REQUIRE_NX,
            "require-measurement" => PolicyFlags::REQUIRE_MEASUREMENT,
            _ => return Err(anyhow!("Unknown policy flag {name}")),
        };
    }
    Ok(flags)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bootgate_drivers::persistent::RevocationList;

    const CONFIG: &str = r#"
flags = ["require-nx", "require-measurement"]

[dbx]
sha256 = ["0101010101010101010101010101010101010101010101010101010101010101"]

[mok_list]
sha1 = ["0202020202020202020202020202020202020202"]

[[revocation]]
name = "sbat"
generation = 1

[[revocation]]
name = "grub"
generation = 3

[[revocation]]
name = "grub"
generation = 2
"#;

    fn blobs(text: &str) -> anyhow::Result<Vec<(VariableName, Vec<u8>)>> {
        let config: PolicyConfig = toml::from_str(text)?;
        build_blobs(&config, Path::new("."))
    }

    #[test]
    fn test_build_blobs() {
        let blobs = blobs(CONFIG).unwrap();
        let names: Vec<_> = blobs.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            [
                VariableName::PlatformDbx,
                VariableName::MokList,
                VariableName::SbatLevel,
                VariableName::PolicyFlags
            ]
        );

        assert_eq!(
            TrustList::decode(&blobs[0].1).unwrap().entries,
            vec![TrustEntry::Sha256([1; 32])]
        );
        assert_eq!(
            TrustList::decode(&blobs[1].1).unwrap().entries,
            vec![TrustEntry::Sha1([2; 20])]
        );

        let revocation = RevocationList::decode(&blobs[2].1).unwrap();
        assert_eq!(revocation.generation_of("sbat"), Some(1));
        assert_eq!(revocation.generation_of("grub"), Some(3));

        assert_eq!(
            blobs[3].1,
            (PolicyFlags::REQUIRE_NX | PolicyFlags::REQUIRE_MEASUREMENT)
                .bits()
                .to_le_bytes()
        );
    }

    #[test]
    fn test_empty_config() {
        assert!(blobs("").unwrap().is_empty());
    }

    #[test]
    fn test_invalid_entries() {
        assert!(blobs("[db]\nsha1 = [\"0102\"]\n").is_err());
        assert!(blobs("[db]\nsha256 = [\"zz\"]\n").is_err());
        assert!(blobs("flags = [\"trust-everything\"]\n").is_err());
        assert!(blobs("[db]\ncerts = [\"missing.der\"]\n").is_err());
    }
}
