// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{FlowdagConfig, RawConfigFile};
use crate::errors::Result;

/// Load a configuration file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; use [`load_and_validate`] for
/// the semantic checks.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let contents = fs::read_to_string(path.as_ref())?;
    parse_str(&contents)
}

/// Deserialize configuration from TOML text.
pub fn parse_str(contents: &str) -> Result<RawConfigFile> {
    let config: RawConfigFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a configuration file and validate it.
///
/// Checks positive numeric options, flow identities, `after` references and
/// acyclic job graphs.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<FlowdagConfig> {
    let raw_config = load_from_path(&path)?;
    FlowdagConfig::try_from(raw_config)
}

/// `Flowdag.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Flowdag.toml")
}
