use anyhow::{Context, Result};
use notify::{Config as NotifyConfig, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::engine::WatchSettings;
use crate::event::DaemonEvent;
use crate::process_monitor::MatchBy;

pub const MIN_INTERVAL_MS: u64 = 100;
pub const MAX_INTERVAL_MS: u64 = 60_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2_000;
pub const DEFAULT_TICK_TIMEOUT_MS: u64 = 5_000;

/// Root configuration structure. Deserialized from `config.toml` in the app
/// data directory.
#[derive(Debug, Default, Deserialize, Clone, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub watch: WatchConfig,
}

/// Policy applied uniformly to every watch pair.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct WatchConfig {
    /// `"name"` (case-insensitive executable name) or `"path"` (full path).
    #[serde(default)]
    pub match_by: MatchBy,
    /// Skip a launch when its target is already running.
    #[serde(default)]
    pub skip_if_target_running: bool,
    /// Milliseconds between ticks. Clamped to [100, 60000].
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    /// Soft limit on one process snapshot. Clamped to [100, 60000].
    #[serde(default = "default_tick_timeout")]
    pub tick_timeout_ms: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            match_by: MatchBy::Name,
            skip_if_target_running: false,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            tick_timeout_ms: DEFAULT_TICK_TIMEOUT_MS,
        }
    }
}

impl WatchConfig {
    pub fn effective_poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS))
    }

    pub fn effective_tick_timeout(&self) -> Duration {
        Duration::from_millis(self.tick_timeout_ms.clamp(MIN_INTERVAL_MS, MAX_INTERVAL_MS))
    }

    pub fn to_settings(&self) -> WatchSettings {
        WatchSettings {
            match_by: self.match_by,
            skip_if_target_running: self.skip_if_target_running,
            poll_interval: self.effective_poll_interval(),
            tick_timeout: self.effective_tick_timeout(),
        }
    }
}

/// Loads the config file at `path`, returning `Config::default()` if the file does not exist.
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_or_default(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Quiet period that lets the burst of events from one save settle before the
/// file is read.
const RELOAD_DEBOUNCE: Duration = Duration::from_millis(100);

/// Watches the data directory holding `config_path` and `pairs_path`.
///
/// A changed config file is re-parsed and sent as `ConfigReloaded`; a config
/// that fails to parse is logged and nothing is sent, so the running settings
/// stay in force. A changed pairs file is announced with `PairsChanged` and
/// read by the receiver.
pub async fn watch_data_files(
    config_path: PathBuf,
    pairs_path: PathBuf,
    tx: mpsc::Sender<DaemonEvent>,
) {
    let (watch_tx, mut watch_rx) = mpsc::channel::<notify::Event>(16);

    let mut watcher = match RecommendedWatcher::new(
        move |res: notify::Result<notify::Event>| {
            if let Ok(event) = res {
                let _ = watch_tx.blocking_send(event);
            }
        },
        NotifyConfig::default(),
    ) {
        Ok(w) => w,
        Err(e) => {
            warn!(error = %e, "failed to create config watcher");
            return;
        }
    };

    // Watch the directory rather than the files so editor-style atomic saves
    // (write-new + rename) are seen.
    let watch_dir = match config_path.parent() {
        Some(d) => d.to_path_buf(),
        None => {
            warn!(path = %config_path.display(), "config path has no parent directory");
            return;
        }
    };

    if let Err(e) = watcher.watch(&watch_dir, RecursiveMode::NonRecursive) {
        warn!(error = %e, "failed to watch config directory");
        return;
    }
    debug!(dir = %watch_dir.display(), "watching data directory");

    while let Some(event) = watch_rx.recv().await {
        let mut config_changed = writes_to(&event, &config_path);
        let mut pairs_changed = writes_to(&event, &pairs_path);
        if !config_changed && !pairs_changed {
            continue;
        }

        tokio::time::sleep(RELOAD_DEBOUNCE).await;
        while let Ok(event) = watch_rx.try_recv() {
            config_changed |= writes_to(&event, &config_path);
            pairs_changed |= writes_to(&event, &pairs_path);
        }

        if config_changed {
            match load_or_default(&config_path) {
                Ok(config) => {
                    if tx.send(DaemonEvent::ConfigReloaded(config)).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!(error = %format!("{e:#}"), "failed to reload config"),
            }
        }
        if pairs_changed && tx.send(DaemonEvent::PairsChanged).await.is_err() {
            break;
        }
    }
}

/// Whether `event` creates or modifies the file `path`. Only file names are
/// compared: the watch is one directory deep and some backends report
/// canonicalized paths.
fn writes_to(event: &notify::Event, path: &Path) -> bool {
    let is_write = matches!(
        event.kind,
        notify::EventKind::Create(_) | notify::EventKind::Modify(_)
    );
    is_write
        && path.file_name().is_some_and(|name| {
            event.paths.iter().any(|p| p.file_name() == Some(name))
        })
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_tick_timeout() -> u64 {
    DEFAULT_TICK_TIMEOUT_MS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_watch(poll_ms: u64, timeout_ms: u64) -> WatchConfig {
        WatchConfig {
            poll_interval_ms: poll_ms,
            tick_timeout_ms: timeout_ms,
            ..WatchConfig::default()
        }
    }

    // ── defaults ──────────────────────────────────────────────────────────────

    #[test]
    fn watch_config_default_values() {
        let w = WatchConfig::default();
        assert_eq!(w.match_by, MatchBy::Name);
        assert!(!w.skip_if_target_running);
        assert_eq!(w.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
        assert_eq!(w.tick_timeout_ms, DEFAULT_TICK_TIMEOUT_MS);
    }

    #[test]
    fn default_settings_match_engine_defaults() {
        assert_eq!(WatchConfig::default().to_settings(), WatchSettings::default());
    }

    // ── clamping ──────────────────────────────────────────────────────────────

    #[test]
    fn poll_interval_clamps_below_min() {
        let w = make_watch(5, DEFAULT_TICK_TIMEOUT_MS);
        assert_eq!(w.effective_poll_interval(), Duration::from_millis(MIN_INTERVAL_MS));
    }

    #[test]
    fn poll_interval_clamps_above_max() {
        let w = make_watch(10_000_000, DEFAULT_TICK_TIMEOUT_MS);
        assert_eq!(w.effective_poll_interval(), Duration::from_millis(MAX_INTERVAL_MS));
    }

    #[test]
    fn tick_timeout_clamps() {
        assert_eq!(
            make_watch(DEFAULT_POLL_INTERVAL_MS, 0).effective_tick_timeout(),
            Duration::from_millis(MIN_INTERVAL_MS)
        );
        assert_eq!(
            make_watch(DEFAULT_POLL_INTERVAL_MS, 3_000).effective_tick_timeout(),
            Duration::from_millis(3_000)
        );
    }

    // ── load_or_default ───────────────────────────────────────────────────────

    #[test]
    fn load_or_default_missing_file_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_or_default(&dir.path().join("nonexistent.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn load_or_default_parses_valid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[watch]
match_by = "path"
skip_if_target_running = true
poll_interval_ms = 3000
tick_timeout_ms = 1500
"#,
        )
        .unwrap();

        let settings = load_or_default(&path).unwrap().watch.to_settings();
        assert_eq!(settings.match_by, MatchBy::Path);
        assert!(settings.skip_if_target_running);
        assert_eq!(settings.poll_interval, Duration::from_millis(3000));
        assert_eq!(settings.tick_timeout, Duration::from_millis(1500));
    }

    #[test]
    fn load_or_default_partial_toml_uses_field_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch]\nskip_if_target_running = true\n").unwrap();

        let config = load_or_default(&path).unwrap();
        assert!(config.watch.skip_if_target_running);
        assert_eq!(config.watch.match_by, MatchBy::Name);
        assert_eq!(config.watch.poll_interval_ms, DEFAULT_POLL_INTERVAL_MS);
    }

    #[test]
    fn load_or_default_invalid_toml_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "this is not valid toml ][[[").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    #[test]
    fn load_or_default_unknown_match_policy_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[watch]\nmatch_by = \"pid\"\n").unwrap();
        assert!(load_or_default(&path).is_err());
    }

    // ── watch_data_files ──────────────────────────────────────────────────────

    struct WatchedDir {
        dir: tempfile::TempDir,
        rx: mpsc::Receiver<DaemonEvent>,
    }

    impl WatchedDir {
        async fn start() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let (tx, rx) = mpsc::channel(16);
            tokio::spawn(watch_data_files(
                dir.path().join("config.toml"),
                dir.path().join("pairs.toml"),
                tx,
            ));
            // Let the watcher register before the first write.
            tokio::time::sleep(Duration::from_millis(200)).await;
            Self { dir, rx }
        }

        /// Replaces `name` the way editors save: write a sibling, then rename.
        fn save(&self, name: &str, content: &str) {
            let path = self.dir.path().join(name);
            let tmp = self.dir.path().join(format!("{name}.tmp"));
            std::fs::write(&tmp, content).unwrap();
            std::fs::rename(&tmp, &path).unwrap();
        }

        async fn next(&mut self, wait_ms: u64) -> Option<DaemonEvent> {
            tokio::time::timeout(Duration::from_millis(wait_ms), self.rx.recv())
                .await
                .ok()
                .flatten()
        }
    }

    #[tokio::test]
    async fn rewriting_config_sends_reloaded_config() {
        let mut watched = WatchedDir::start().await;
        watched.save("config.toml", "[watch]\npoll_interval_ms = 500\n");

        let Some(DaemonEvent::ConfigReloaded(config)) = watched.next(5_000).await else {
            panic!("expected a reloaded config");
        };
        assert_eq!(config.watch.poll_interval_ms, 500);
    }

    #[tokio::test]
    async fn unparsable_config_sends_nothing_until_fixed() {
        let mut watched = WatchedDir::start().await;
        watched.save("config.toml", "[watch]\nmatch_by = \"pid\"\n");
        assert!(watched.next(500).await.is_none());

        watched.save("config.toml", "[watch]\nskip_if_target_running = true\n");
        let Some(DaemonEvent::ConfigReloaded(config)) = watched.next(5_000).await else {
            panic!("expected a reloaded config");
        };
        assert!(config.watch.skip_if_target_running);
    }

    #[tokio::test]
    async fn rewriting_pairs_sends_pairs_changed() {
        let mut watched = WatchedDir::start().await;
        let mut registry = crate::registry::Registry::new(watched.dir.path().join("pairs.toml"));
        registry
            .add(crate::pair::WatchPair::new("game.exe", "obs.exe").unwrap())
            .unwrap();

        assert!(matches!(
            watched.next(5_000).await,
            Some(DaemonEvent::PairsChanged)
        ));
    }

    #[tokio::test]
    async fn unrelated_files_are_ignored() {
        let mut watched = WatchedDir::start().await;
        watched.save("notes.txt", "hello");
        assert!(watched.next(500).await.is_none());
    }
}
