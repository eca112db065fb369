// src/config/mod.rs

//! Configuration loading and validation.
//!
//! - `model.rs`: the TOML-backed data model and its typed views.
//! - `loader.rs`: reading a config file from disk.
//! - `validate.rs`: option sanity, flow identities and job DAG correctness.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, load_and_validate, load_from_path, parse_str};
pub use model::{
    EnforcerConfig, FlowConfig, FlowdagConfig, JobEntry, LeaseConfig, RawConfigFile, SlaConfig,
    StreamConfig, parse_duration,
};
