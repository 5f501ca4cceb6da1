/*++

Licensed under the Apache-2.0 license.

File Name:

   config.rs

Abstract:

    File contains utilities for parsing policy configuration files

--*/

use anyhow::Context;
use serde_derive::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Contents of one hash or certificate list
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct TrustListConfig {
    #[serde(default)]
    pub sha1: Vec<String>,

    #[serde(default)]
    pub sha256: Vec<String>,

    /// DER certificate files, relative to the configuration file
    #[serde(default)]
    pub certs: Vec<PathBuf>,
}

/// Minimum generation of one component
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct RevocationConfig {
    pub name: String,

    pub generation: u32,
}

// Policy Configuration
#[derive(Default, Serialize, Deserialize)]
pub(crate) struct PolicyConfig {
    pub db: Option<TrustListConfig>,

    pub dbx: Option<TrustListConfig>,

    pub mok_list: Option<TrustListConfig>,

    pub mok_list_x: Option<TrustListConfig>,

    #[serde(default)]
    pub revocation: Vec<RevocationConfig>,

    pub flags: Option<Vec<String>>,
}

/// Load Policy Configuration from file
pub(crate) fn load_policy_config(path: &Path) -> anyhow::Result<PolicyConfig> {
    let config_str = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read the config file {}", path.display()))?;

    let config: PolicyConfig = toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;

    Ok(config)
}
