use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by the pair registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// User input rejected before touching the registry.
    #[error("invalid pair: {0}")]
    Validation(String),

    #[error("no pair at index {index} (registry holds {len})")]
    Index { index: usize, len: usize },

    /// The persisted file exists but could not be read or parsed.
    #[error("failed to load pairs from {}: {reason}", path.display())]
    Config { path: PathBuf, reason: String },

    /// Writing the registry file failed. The in-memory mutation that
    /// triggered the write has already been applied.
    #[error("failed to save pairs to {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid control-surface transitions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("no pairs configured")]
    NoPairs,

    #[error("already watching")]
    AlreadyRunning,

    #[error("not watching")]
    NotRunning,
}

/// A launch target could not be started.
#[derive(Debug, Error)]
#[error("failed to launch {target}: {source}")]
pub struct LaunchError {
    pub target: String,
    #[source]
    pub source: std::io::Error,
}
