use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::warn;

/// Lifecycle state of the watch engine.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum EngineStatus {
    /// No watch loop is running.
    Idle,
    /// The loop is running and launching on rising edges.
    Watching,
    /// The loop is alive but ticks are skipped; nothing is launched.
    Paused,
}

impl std::fmt::Display for EngineStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EngineStatus::Idle => "Not Watching",
            EngineStatus::Watching => "Watching",
            EngineStatus::Paused => "Paused",
        };
        f.write_str(s)
    }
}

/// Runtime status written to `status.toml` for whatever UI sits on top of the
/// engine. Rewritten on every transition and after every eventful tick.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatcherStatus {
    /// Binary version (set from Cargo.toml at compile time).
    pub version: String,
    pub state: EngineStatus,
    /// Number of pairs in the registry.
    pub pair_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_launch_target: Option<String>,
    /// RFC 3339 timestamp of the most recent launch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_launch_timestamp: Option<String>,
    /// Most recent non-fatal error (failed launch, failed save).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl WatcherStatus {
    pub fn new(pair_count: usize) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            state: EngineStatus::Idle,
            pair_count,
            last_launch_target: None,
            last_launch_timestamp: None,
            error: None,
        }
    }
}

/// Serializes `status` to TOML and writes it to `path`, creating the parent
/// directory if needed. Failures are logged; a status write never takes the
/// engine down.
pub fn write_status(path: &Path, status: &WatcherStatus) {
    if let Some(parent) = path.parent() {
        if let Err(e) = std::fs::create_dir_all(parent) {
            warn!(dir = %parent.display(), error = %e, "failed to create status directory");
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                warn!(error = %e, "failed to write status file");
            }
        }
        Err(e) => warn!(error = %e, "failed to serialize status"),
    }
}
