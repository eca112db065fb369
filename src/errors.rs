// src/errors.rs

//! Crate-wide error type and result alias.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowdagError {
    /// The task stream is bounded and already holds `capacity` tasks.
    #[error("Task stream rejected submission: capacity of {capacity} reached")]
    QueueRejected { capacity: usize },

    /// The lease arbiter failed with something other than obtained/lost/deferred.
    #[error("Lease arbiter error: {0}")]
    LeaseError(String),

    #[error("Failed to construct DAG task: {0}")]
    TaskConstructionFailed(String),

    #[error("Flow spec not found: {0}")]
    SpecNotFound(String),

    #[error("Flow compiler unavailable: {0}")]
    CompileUnavailable(String),

    #[error("Flow compilation interrupted: {0}")]
    CompileInterrupted(String),

    #[error("No state found for DAG {0}")]
    StateMissing(String),

    /// A job config value is absent or cannot be parsed.
    #[error("Malformed job config: {0}")]
    ConfigMalformed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowdagError>;
