use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// One trigger → launch relationship.
///
/// Immutable once built; replace a pair by removing it and adding a new one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawPair")]
pub struct WatchPair {
    trigger_identifier: String,
    launch_target: String,
}

/// On-disk shape of a pair before validation. Missing fields read as empty so
/// the registry can skip a bad entry instead of rejecting the whole file.
#[derive(Deserialize)]
pub(crate) struct RawPair {
    #[serde(default)]
    pub(crate) trigger_identifier: String,
    #[serde(default)]
    pub(crate) launch_target: String,
}

impl TryFrom<RawPair> for WatchPair {
    type Error = RegistryError;

    fn try_from(raw: RawPair) -> Result<Self, Self::Error> {
        WatchPair::new(raw.trigger_identifier, raw.launch_target)
    }
}

impl WatchPair {
    /// Builds a pair, rejecting empty or whitespace-only fields.
    pub fn new(
        trigger: impl Into<String>,
        launch: impl Into<String>,
    ) -> Result<Self, RegistryError> {
        let trigger = trigger.into().trim().to_string();
        let launch = launch.into().trim().to_string();
        if trigger.is_empty() {
            return Err(RegistryError::Validation(
                "trigger identifier must not be empty".to_string(),
            ));
        }
        if launch.is_empty() {
            return Err(RegistryError::Validation(
                "launch target must not be empty".to_string(),
            ));
        }
        Ok(Self {
            trigger_identifier: trigger,
            launch_target: launch,
        })
    }

    /// Executable path or bare executable name matched against running processes.
    pub fn trigger_identifier(&self) -> &str {
        &self.trigger_identifier
    }

    /// Executable started when the trigger appears.
    pub fn launch_target(&self) -> &str {
        &self.launch_target
    }

    /// Short "Watch: a.exe → b.exe" label used by list output.
    pub fn label(&self) -> String {
        format!(
            "Watch: {} → {}",
            base_name(&self.trigger_identifier),
            base_name(&self.launch_target)
        )
    }
}

/// Final component of a path, splitting on both `/` and `\` so Windows-style
/// identifiers resolve the same way on every host.
pub fn base_name(identifier: &str) -> &str {
    identifier
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(identifier)
}

/// Case-insensitive executable name key.
pub fn normalize_name(identifier: &str) -> String {
    base_name(identifier).to_lowercase()
}

/// Full-path comparison key. Separators are unified everywhere; case is only
/// folded on Windows, where the filesystem is case-insensitive.
pub fn normalize_path(path: &str) -> String {
    let unified = path.replace('\\', "/");
    if cfg!(windows) {
        unified.to_lowercase()
    } else {
        unified
    }
}
