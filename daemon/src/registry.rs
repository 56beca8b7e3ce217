/// Ordered, persisted collection of watch pairs.
///
/// The registry is loaded at startup and fully rewritten on every mutation.
/// The in-memory sequence is authoritative: a failed write is reported to the
/// caller but never rolls the mutation back. Edits made to the file by another
/// process are merged with [`Registry::reload`].
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::RegistryError;
use crate::pair::{RawPair, WatchPair};

/// Suffix of the copy kept when the registry file fails to parse.
pub const CORRUPT_SUFFIX: &str = "corrupt";

#[derive(Deserialize)]
struct StoredPairs {
    #[serde(default)]
    pairs: Vec<RawPair>,
}

#[derive(Serialize)]
struct PairsRef<'a> {
    pairs: &'a [WatchPair],
}

#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    pairs: Vec<WatchPair>,
}

impl Registry {
    /// An empty registry that will persist to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            pairs: Vec::new(),
        }
    }

    /// Loads the registry at `path`, falling back to an empty registry when the
    /// file is missing or malformed. Load failures are logged, never fatal.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let pairs = match load(&path) {
            Ok(pairs) => {
                info!(path = %path.display(), count = pairs.len(), "loaded pairs");
                pairs
            }
            Err(e) => {
                warn!(error = %e, "starting with an empty registry");
                preserve_corrupt(&path);
                Vec::new()
            }
        };
        Self { path, pairs }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn pairs(&self) -> &[WatchPair] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Appends `pair` and persists, returning the index it was stored at.
    /// Duplicates are allowed.
    ///
    /// A [`RegistryError::Io`] result means the pair *was* added in memory, as
    /// the last entry, but could not be written to disk.
    pub fn add(&mut self, pair: WatchPair) -> Result<usize, RegistryError> {
        debug!(pair = %pair.label(), "adding pair");
        self.pairs.push(pair);
        save(&self.path, &self.pairs)?;
        Ok(self.pairs.len() - 1)
    }

    /// Removes the pair at `index` and persists, returning the removed pair on
    /// success. Persistence failures behave as in [`Registry::add`].
    pub fn remove(&mut self, index: usize) -> Result<WatchPair, RegistryError> {
        if index >= self.pairs.len() {
            return Err(RegistryError::Index {
                index,
                len: self.pairs.len(),
            });
        }
        let removed = self.pairs.remove(index);
        debug!(pair = %removed.label(), index, "removed pair");
        save(&self.path, &self.pairs)?;
        Ok(removed)
    }

    /// Re-reads the file and adopts its content when it differs from memory.
    /// Returns whether anything changed. On error the current pairs are kept.
    pub fn reload(&mut self) -> Result<bool, RegistryError> {
        let pairs = load(&self.path)?;
        if pairs == self.pairs {
            return Ok(false);
        }
        info!(path = %self.path.display(), count = pairs.len(), "pairs changed on disk");
        self.pairs = pairs;
        Ok(true)
    }

    /// Rewrites the registry file from the in-memory sequence.
    pub fn save(&self) -> Result<(), RegistryError> {
        save(&self.path, &self.pairs)
    }
}

/// Reads the pair sequence stored at `path`.
///
/// A missing file is an empty registry. Entries with an empty field are skipped
/// with a warning; a file that does not parse at all is a
/// [`RegistryError::Config`].
pub fn load(path: &Path) -> Result<Vec<WatchPair>, RegistryError> {
    if !path.exists() {
        info!(path = %path.display(), "no registry file yet");
        return Ok(Vec::new());
    }
    let config_err = |reason: String| RegistryError::Config {
        path: path.to_path_buf(),
        reason,
    };
    let content = std::fs::read_to_string(path).map_err(|e| config_err(e.to_string()))?;
    let stored: StoredPairs = toml::from_str(&content).map_err(|e| config_err(e.to_string()))?;

    let mut pairs = Vec::with_capacity(stored.pairs.len());
    for (index, raw) in stored.pairs.into_iter().enumerate() {
        match WatchPair::try_from(raw) {
            Ok(pair) => pairs.push(pair),
            Err(e) => warn!(index, error = %e, "skipping stored pair"),
        }
    }
    Ok(pairs)
}

/// Atomically overwrites `path` with `pairs`: the content goes to a sibling
/// temporary file first and is renamed into place.
pub fn save(path: &Path, pairs: &[WatchPair]) -> Result<(), RegistryError> {
    let io_err = |source: std::io::Error| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
    }
    let content = toml::to_string_pretty(&PairsRef { pairs })
        .map_err(|e| io_err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;

    let tmp = sibling(path, "tmp");
    std::fs::write(&tmp, content).map_err(io_err)?;
    if let Err(e) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    Ok(())
}

/// Copies an unreadable registry file aside so the next save, which overwrites
/// the file in place, does not destroy it.
fn preserve_corrupt(path: &Path) {
    if !path.exists() {
        return;
    }
    let backup = sibling(path, CORRUPT_SUFFIX);
    match std::fs::copy(path, &backup) {
        Ok(_) => warn!(backup = %backup.display(), "kept a copy of the unreadable registry"),
        Err(e) => warn!(error = %e, "failed to copy unreadable registry aside"),
    }
}

/// `pairs.toml` → `pairs.toml.<suffix>`
fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}
