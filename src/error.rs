//! Error types shared by the extraction pipeline and the training launcher.

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort an extraction run.
///
/// Configuration and data errors are raised while planning, before any file
/// is written, so a failed run never leaves a partially materialized dataset.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// Malformed or inconsistent configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// An annotation that cannot be mapped onto the configured class list
    #[error("Data integrity error: {0}")]
    DataIntegrity(String),

    /// The record source could not deliver rows
    #[error("Record source error: {0}")]
    Source(String),

    /// A dataset on disk failed verification
    #[error("Dataset verification failed: {0}")]
    Verification(String),

    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
