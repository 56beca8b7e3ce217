/// The watch engine: owns the pair registry, the watch-loop task and its
/// control flags.
///
/// Collaborators (console, tray, GUI) hold a cloneable [`Engine`] handle and
/// drive it through synchronous calls. The polling loop runs as a single Tokio
/// task; each tick takes one process snapshot and makes one pass over the
/// registry, and ticks never overlap. At most one snapshot call is in flight:
/// one that outlives its tick's timeout is left to finish and blocks new
/// snapshots until it does.
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_TICK_TIMEOUT_MS};
use crate::edge::{EdgeTracker, TickReport};
use crate::error::{EngineError, RegistryError};
use crate::launcher::{Launcher, SystemLauncher};
use crate::pair::WatchPair;
use crate::process_monitor::{MatchBy, ProcessSource, Snapshot, SysinfoSource};
use crate::registry::Registry;
use crate::status::{write_status, EngineStatus, WatcherStatus};

/// Watch policy shared by every pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    pub match_by: MatchBy,
    /// Treat a rising edge as already satisfied when the launch target is
    /// itself running.
    pub skip_if_target_running: bool,
    pub poll_interval: Duration,
    /// Soft limit on one process snapshot; a slower snapshot skips the tick.
    pub tick_timeout: Duration,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self {
            match_by: MatchBy::Name,
            skip_if_target_running: false,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            tick_timeout: Duration::from_millis(DEFAULT_TICK_TIMEOUT_MS),
        }
    }
}

/// A snapshot call that outlived its tick, handed on until it returns.
type PendingSnapshot = Option<JoinHandle<Snapshot>>;

/// A running watch loop.
struct Session {
    stop_tx: watch::Sender<bool>,
    paused: Arc<AtomicBool>,
    task: JoinHandle<PendingSnapshot>,
}

impl Session {
    fn is_alive(&self) -> bool {
        !self.task.is_finished()
    }
}

struct Inner {
    registry: RwLock<Registry>,
    settings: RwLock<WatchSettings>,
    source: Arc<dyn ProcessSource>,
    launcher: Arc<dyn Launcher>,
    runtime: Handle,
    session: Mutex<Option<Session>>,
    /// Task of the last stopped session; the next session waits for it.
    retired: Mutex<Option<JoinHandle<PendingSnapshot>>>,
    status: Mutex<WatcherStatus>,
    status_path: Option<PathBuf>,
}

/// Handle to the watch engine. Clones share the same engine.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

pub struct EngineBuilder {
    registry: Registry,
    settings: WatchSettings,
    source: Arc<dyn ProcessSource>,
    launcher: Arc<dyn Launcher>,
    status_path: Option<PathBuf>,
}

impl EngineBuilder {
    pub fn settings(mut self, settings: WatchSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn source(mut self, source: Arc<dyn ProcessSource>) -> Self {
        self.source = source;
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = launcher;
        self
    }

    /// Mirror engine status into `path` on every change.
    pub fn status_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.status_path = Some(path.into());
        self
    }

    /// Builds the engine. Must be called from within a Tokio runtime; the watch
    /// loop is spawned onto that runtime even when `start` is called from a
    /// plain thread.
    pub fn build(self) -> Engine {
        let status = WatcherStatus::new(self.registry.len());
        let engine = Engine {
            inner: Arc::new(Inner {
                registry: RwLock::new(self.registry),
                settings: RwLock::new(self.settings),
                source: self.source,
                launcher: self.launcher,
                runtime: Handle::current(),
                session: Mutex::new(None),
                retired: Mutex::new(None),
                status: Mutex::new(status),
                status_path: self.status_path,
            }),
        };
        engine.inner.publish(|_| {});
        engine
    }
}

impl Engine {
    /// Starts configuring an engine over `registry`, defaulting to the real
    /// process table and real process launches.
    pub fn builder(registry: Registry) -> EngineBuilder {
        EngineBuilder {
            registry,
            settings: WatchSettings::default(),
            source: Arc::new(SysinfoSource::new()),
            launcher: Arc::new(SystemLauncher),
            status_path: None,
        }
    }

    // ── Registry ──────────────────────────────────────────────────────────────

    /// Validates and appends a pair, persisting immediately, and returns its
    /// index. See [`Registry::add`] for the meaning of a persistence error.
    pub fn registry_add(&self, trigger: &str, launch: &str) -> Result<usize, RegistryError> {
        let pair = WatchPair::new(trigger, launch)?;
        let result = self.inner.registry.write().add(pair);
        self.inner.record_registry_result(&result);
        result
    }

    pub fn registry_remove(&self, index: usize) -> Result<WatchPair, RegistryError> {
        let result = self.inner.registry.write().remove(index);
        self.inner.record_registry_result(&result);
        result
    }

    pub fn registry_list(&self) -> Vec<WatchPair> {
        self.inner.registry.read().pairs().to_vec()
    }

    /// Picks up edits made to the registry file by another process, such as
    /// the one-shot `add` and `remove` subcommands. Returns whether the pair
    /// list changed; the watch loop sees the new list from its next tick.
    pub fn registry_reload(&self) -> Result<bool, RegistryError> {
        let result = self.inner.registry.write().reload();
        match &result {
            Ok(true) => self.inner.publish(|_| {}),
            Ok(false) => {}
            Err(e) => warn!(error = %e, "ignoring unreadable registry file"),
        }
        result
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    pub fn settings(&self) -> WatchSettings {
        self.inner.settings.read().clone()
    }

    /// Replaces the watch policy. Matching and suppression apply from the next
    /// tick; a new poll interval applies from the next `start`.
    pub fn update_settings(&self, settings: WatchSettings) {
        let running = self.status() != EngineStatus::Idle;
        let mut current = self.inner.settings.write();
        if running && current.poll_interval != settings.poll_interval {
            info!(
                interval_ms = settings.poll_interval.as_millis() as u64,
                "poll interval changes on next start"
            );
        }
        *current = settings;
    }

    // ── Control surface ───────────────────────────────────────────────────────

    pub fn status(&self) -> EngineStatus {
        match self.inner.session.lock().as_ref() {
            Some(s) if s.is_alive() => {
                if s.paused.load(Ordering::SeqCst) {
                    EngineStatus::Paused
                } else {
                    EngineStatus::Watching
                }
            }
            _ => EngineStatus::Idle,
        }
    }

    /// Spawns the watch loop with fresh edge state.
    pub fn start(&self) -> Result<(), EngineError> {
        let mut session = self.inner.session.lock();
        if session.as_ref().is_some_and(Session::is_alive) {
            return Err(EngineError::AlreadyRunning);
        }
        let pair_count = self.inner.registry.read().len();
        if pair_count == 0 {
            return Err(EngineError::NoPairs);
        }

        let poll_interval = self.inner.settings.read().poll_interval;
        let previous = self.inner.retired.lock().take();
        let (stop_tx, stop_rx) = watch::channel(false);
        let paused = Arc::new(AtomicBool::new(false));
        let task = self.inner.runtime.spawn(watch_loop(
            Arc::clone(&self.inner),
            stop_rx,
            Arc::clone(&paused),
            poll_interval,
            previous,
        ));
        *session = Some(Session {
            stop_tx,
            paused,
            task,
        });
        drop(session);

        info!(
            pairs = pair_count,
            interval_ms = poll_interval.as_millis() as u64,
            "watching started"
        );
        self.inner.publish(|s| s.state = EngineStatus::Watching);
        Ok(())
    }

    /// Ends the watch loop before its next tick. Launches already dispatched
    /// are unaffected. A tick in progress finishes before the next session's
    /// first tick.
    pub fn stop(&self) -> Result<(), EngineError> {
        let session = self.inner.session.lock().take();
        match session {
            Some(s) if s.is_alive() => {
                let _ = s.stop_tx.send(true);
                *self.inner.retired.lock() = Some(s.task);
                info!("watching stopped");
                self.inner.publish(|s| s.state = EngineStatus::Idle);
                Ok(())
            }
            _ => Err(EngineError::NotRunning),
        }
    }

    /// Starts when idle, stops otherwise.
    pub fn toggle(&self) -> Result<EngineStatus, EngineError> {
        if self.status() == EngineStatus::Idle {
            self.start()?;
        } else {
            self.stop()?;
        }
        Ok(self.status())
    }

    pub fn pause(&self) -> Result<(), EngineError> {
        self.set_paused(true)
    }

    pub fn resume(&self) -> Result<(), EngineError> {
        self.set_paused(false)
    }

    fn set_paused(&self, paused: bool) -> Result<(), EngineError> {
        {
            let session = self.inner.session.lock();
            let Some(s) = session.as_ref().filter(|s| s.is_alive()) else {
                return Err(EngineError::NotRunning);
            };
            if s.paused.swap(paused, Ordering::SeqCst) == paused {
                return Ok(());
            }
        }
        let state = if paused {
            info!("watching paused");
            EngineStatus::Paused
        } else {
            info!("watching resumed");
            EngineStatus::Watching
        };
        self.inner.publish(|s| s.state = state);
        Ok(())
    }

    /// Stops the loop (if any) and waits for the task to finish, then records
    /// the idle state.
    pub async fn shutdown(&self) {
        let session = self.inner.session.lock().take();
        let retired = self.inner.retired.lock().take();
        let current = session.map(|s| {
            let _ = s.stop_tx.send(true);
            s.task
        });
        for task in retired.into_iter().chain(current) {
            if let Err(e) = task.await {
                warn!(error = %e, "watch loop ended abnormally");
            }
        }
        self.inner.publish(|s| {
            s.state = EngineStatus::Idle;
            s.error = None;
        });
    }

    /// Copy of the most recently published status.
    pub fn report(&self) -> WatcherStatus {
        let mut status = self.inner.status.lock().clone();
        status.state = self.status();
        status
    }
}

impl Inner {
    /// Applies `update` to the status and mirrors it to the status file.
    fn publish(&self, update: impl FnOnce(&mut WatcherStatus)) {
        let pair_count = self.registry.read().len();
        let mut status = self.status.lock();
        update(&mut status);
        status.pair_count = pair_count;
        if let Some(path) = &self.status_path {
            write_status(path, &status);
        }
    }

    fn record_registry_result<T>(&self, result: &Result<T, RegistryError>) {
        match result {
            Err(e @ RegistryError::Io { .. }) => {
                warn!(error = %e, "registry changed in memory but was not saved");
                let message = e.to_string();
                self.publish(|s| s.error = Some(message));
            }
            _ => self.publish(|_| {}),
        }
    }

    fn record_tick(&self, report: &TickReport) {
        let now = chrono::Local::now().to_rfc3339();
        self.publish(|s| {
            if let Some((target, _)) = report.launched.last() {
                s.last_launch_target = Some(target.clone());
                s.last_launch_timestamp = Some(now);
            }
            s.error = report.failures.last().map(|e| e.to_string());
        });
    }

    /// One tick. `in_flight` carries a snapshot call that outlived an earlier
    /// tick's timeout; while it runs no new call is made.
    async fn run_tick(
        &self,
        tracker: &mut EdgeTracker,
        in_flight: &mut PendingSnapshot,
        skip: impl Fn() -> bool,
    ) {
        let mut task = match in_flight.take() {
            Some(task) if !task.is_finished() => {
                warn!("previous snapshot still running; skipping tick");
                *in_flight = Some(task);
                return;
            }
            // A late result describes an old process table; take a new one.
            _ => {
                let source = Arc::clone(&self.source);
                tokio::task::spawn_blocking(move || source.snapshot())
            }
        };

        let tick_timeout = self.settings.read().tick_timeout;
        let snapshot = match timeout(tick_timeout, &mut task).await {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(e)) => {
                warn!(error = %e, "process snapshot failed; skipping tick");
                return;
            }
            Err(_) => {
                warn!(
                    timeout_ms = tick_timeout.as_millis() as u64,
                    "process snapshot timed out; skipping tick"
                );
                *in_flight = Some(task);
                return;
            }
        };

        // Paused or stopped while the snapshot was being taken.
        if skip() {
            return;
        }

        let pairs = self.registry.read().pairs().to_vec();
        let settings = self.settings.read().clone();
        let report = tracker.tick(&pairs, &snapshot, &settings, self.launcher.as_ref());
        if !report.is_quiet() {
            self.record_tick(&report);
        }
    }
}

async fn watch_loop(
    inner: Arc<Inner>,
    mut stop_rx: watch::Receiver<bool>,
    paused: Arc<AtomicBool>,
    poll_interval: Duration,
    previous: Option<JoinHandle<PendingSnapshot>>,
) -> PendingSnapshot {
    // The stopped session's loop finishes its tick first and hands over any
    // snapshot call it left running.
    let mut in_flight = match previous {
        Some(previous) => previous.await.unwrap_or_else(|e| {
            debug!(error = %e, "previous watch loop ended abnormally");
            None
        }),
        None => None,
    };

    let mut tracker = EdgeTracker::new();
    let mut ticker = interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        if paused.load(Ordering::SeqCst) {
            continue;
        }

        let skip = || paused.load(Ordering::SeqCst) || *stop_rx.borrow();
        inner.run_tick(&mut tracker, &mut in_flight, skip).await;
    }
    debug!("watch loop exited");
    in_flight
}
