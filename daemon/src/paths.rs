/// Canonical locations of the watcher's data files.
///
/// Everything lives in one directory, `<config dir>/Launchwatch/` by default
/// (`%APPDATA%\Launchwatch\` on Windows):
///   - config.toml  Watch policy, edited by the user and hot-reloaded.
///   - pairs.toml   The pair registry, rewritten on every add/remove.
///   - status.toml  Written by the engine, read by any UI.
use std::path::{Path, PathBuf};

const APP_DIR_NAME: &str = "Launchwatch";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const PAIRS_FILE_NAME: &str = "pairs.toml";
pub const STATUS_FILE_NAME: &str = "status.toml";

/// Resolved data file locations rooted at one directory.
#[derive(Debug, Clone)]
pub struct AppPaths {
    dir: PathBuf,
}

impl AppPaths {
    /// Uses `override_dir` when given, otherwise the platform default.
    pub fn resolve(override_dir: Option<&Path>) -> Self {
        let dir = match override_dir {
            Some(dir) => dir.to_path_buf(),
            None => default_app_dir(),
        };
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.dir.join(CONFIG_FILE_NAME)
    }

    pub fn pairs_file(&self) -> PathBuf {
        self.dir.join(PAIRS_FILE_NAME)
    }

    pub fn status_file(&self) -> PathBuf {
        self.dir.join(STATUS_FILE_NAME)
    }
}

/// `<platform config dir>/Launchwatch`, falling back to `./Launchwatch` when
/// the platform reports no config directory.
pub fn default_app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR_NAME)
}
