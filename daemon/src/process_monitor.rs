use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;
use sysinfo::{ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind};

use crate::pair::{normalize_name, normalize_path};

/// How a pair's identifiers are compared against running processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchBy {
    /// Case-insensitive base executable name. Survives reinstalls and updates
    /// that move the executable.
    #[default]
    Name,
    /// Normalized full executable path.
    Path,
}

/// One entry of a process snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunningProcess {
    pub name: String,
    /// `None` when the executable path could not be read (access denied,
    /// kernel threads, processes that exited mid-query).
    pub path: Option<PathBuf>,
}

/// The set of processes observed during one tick, indexed for both match
/// policies.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    names: HashSet<String>,
    paths: HashSet<String>,
}

impl Snapshot {
    pub fn from_processes<I>(processes: I) -> Self
    where
        I: IntoIterator<Item = RunningProcess>,
    {
        let mut snapshot = Self::default();
        for p in processes {
            if !p.name.is_empty() {
                snapshot.names.insert(normalize_name(&p.name));
            }
            if let Some(path) = p.path {
                let path = path.to_string_lossy();
                if !path.is_empty() {
                    // Some platforms truncate `name`; the path's final component
                    // is the authoritative executable name.
                    snapshot.names.insert(normalize_name(&path));
                    snapshot.paths.insert(normalize_path(&path));
                }
            }
        }
        snapshot
    }

    /// Convenience for tests and scripted providers: processes known only by name.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::from_processes(names.into_iter().map(|n| RunningProcess {
            name: n.as_ref().to_string(),
            path: None,
        }))
    }

    /// Whether `identifier` (a bare name or a full path) is running under `policy`.
    pub fn contains(&self, identifier: &str, policy: MatchBy) -> bool {
        match policy {
            MatchBy::Name => self.names.contains(&normalize_name(identifier)),
            MatchBy::Path => self.paths.contains(&normalize_path(identifier)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.paths.is_empty()
    }
}

/// Source of process snapshots. Implementations must not fail the whole query
/// because a single process could not be inspected.
pub trait ProcessSource: Send + Sync {
    fn snapshot(&self) -> Snapshot;
}

/// [`ProcessSource`] backed by `sysinfo`. The `System` is reused across ticks
/// so each refresh only has to inspect new processes in full.
pub struct SysinfoSource {
    sys: Mutex<System>,
}

impl SysinfoSource {
    pub fn new() -> Self {
        Self {
            sys: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoSource {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessSource for SysinfoSource {
    fn snapshot(&self) -> Snapshot {
        let mut sys = self.sys.lock();
        sys.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::new().with_exe(UpdateKind::OnlyIfNotSet),
        );
        Snapshot::from_processes(sys.processes().values().map(|p| RunningProcess {
            name: p.name().to_string_lossy().into_owned(),
            path: p.exe().map(|e| e.to_path_buf()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proc(name: &str, path: Option<&str>) -> RunningProcess {
        RunningProcess {
            name: name.to_string(),
            path: path.map(PathBuf::from),
        }
    }

    #[test]
    fn name_match_is_case_insensitive() {
        let snap = Snapshot::from_names(["Notepad.EXE"]);
        assert!(snap.contains("notepad.exe", MatchBy::Name));
        assert!(snap.contains("NOTEPAD.exe", MatchBy::Name));
        assert!(!snap.contains("calc.exe", MatchBy::Name));
    }

    #[test]
    fn name_match_uses_base_name_of_full_path_identifier() {
        let snap = Snapshot::from_names(["steam.exe"]);
        assert!(snap.contains(r"C:\Program Files\Steam\steam.exe", MatchBy::Name));
        assert!(snap.contains("/opt/steam/steam.exe", MatchBy::Name));
    }

    #[test]
    fn name_index_includes_path_base_name() {
        // Linux truncates comm names to 15 characters; the exe path is complete.
        let snap = Snapshot::from_processes([proc(
            "really-long-pro",
            Some("/usr/bin/really-long-program-name"),
        )]);
        assert!(snap.contains("really-long-program-name", MatchBy::Name));
    }

    #[test]
    fn path_match_requires_full_path() {
        let snap = Snapshot::from_processes([proc("game", Some("/opt/games/game"))]);
        assert!(snap.contains("/opt/games/game", MatchBy::Path));
        assert!(!snap.contains("game", MatchBy::Path));
        assert!(!snap.contains("/usr/bin/game", MatchBy::Path));
    }

    #[test]
    fn path_match_ignores_processes_without_path() {
        let snap = Snapshot::from_processes([proc("game", None)]);
        assert!(!snap.contains("/opt/games/game", MatchBy::Path));
        assert!(snap.contains("game", MatchBy::Name));
    }

    #[test]
    fn path_match_unifies_separators() {
        let snap = Snapshot::from_processes([proc("app.exe", Some(r"C:\Tools\app.exe"))]);
        assert!(snap.contains("C:/Tools/app.exe", MatchBy::Path));
    }

    #[test]
    fn empty_names_are_dropped() {
        let snap = Snapshot::from_processes([proc("", None)]);
        assert!(snap.is_empty());
    }

    #[test]
    fn match_by_deserializes_lowercase() {
        #[derive(Deserialize)]
        struct Wrapper {
            m: MatchBy,
        }
        let w: Wrapper = toml::from_str("m = \"path\"").unwrap();
        assert_eq!(w.m, MatchBy::Path);
        let w: Wrapper = toml::from_str("m = \"name\"").unwrap();
        assert_eq!(w.m, MatchBy::Name);
    }

    #[test]
    fn sysinfo_source_sees_current_process() {
        let source = SysinfoSource::new();
        let snap = source.snapshot();
        let exe = std::env::current_exe().unwrap();
        let name = exe.file_name().unwrap().to_string_lossy().into_owned();
        assert!(snap.contains(&name, MatchBy::Name));
    }
}
