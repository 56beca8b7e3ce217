/// Trigger-edge tracking: turns "trigger is running" (a level) into "launch
/// now" (an edge) at most once per presence episode.
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use crate::engine::WatchSettings;
use crate::error::LaunchError;
use crate::launcher::{program_of, Launcher, ProcessHandle};
use crate::pair::WatchPair;
use crate::process_monitor::Snapshot;

/// Identity of a pair's edge slot.
///
/// Pairs that watch the same trigger but launch different targets get separate
/// slots, and exact duplicates are told apart by their ordinal. The absolute
/// registry index is deliberately not part of the key so removing an unrelated
/// pair mid-session does not shift anyone's state.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PairKey {
    trigger: String,
    launch: String,
    ordinal: usize,
}

/// What happened during one pass over the registry.
#[derive(Debug, Default)]
pub struct TickReport {
    pub launched: Vec<(String, ProcessHandle)>,
    /// Targets not launched because they were already running.
    pub suppressed: Vec<String>,
    pub failures: Vec<LaunchError>,
}

impl TickReport {
    pub fn is_quiet(&self) -> bool {
        self.launched.is_empty() && self.suppressed.is_empty() && self.failures.is_empty()
    }
}

/// Per-pair `fired` flags for the current watch session.
#[derive(Debug, Default)]
pub struct EdgeTracker {
    fired: HashMap<PairKey, bool>,
}

impl EdgeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluates every pair in registry order against `snapshot`, launching on
    /// rising edges. A failed launch is logged and reported; it never stops the
    /// remaining pairs.
    pub fn tick(
        &mut self,
        pairs: &[WatchPair],
        snapshot: &Snapshot,
        settings: &WatchSettings,
        launcher: &dyn Launcher,
    ) -> TickReport {
        let mut report = TickReport::default();
        let keys = keys_for(pairs);

        for (pair, key) in pairs.iter().zip(&keys) {
            let present = snapshot.contains(pair.trigger_identifier(), settings.match_by);
            let fired = self.fired.entry(key.clone()).or_insert(false);

            if !present {
                *fired = false;
                continue;
            }
            if *fired {
                continue;
            }

            // Rising edge.
            *fired = true;
            let target = pair.launch_target();
            if settings.skip_if_target_running
                && snapshot.contains(&program_of(target), settings.match_by)
            {
                info!(
                    trigger = pair.trigger_identifier(),
                    launch = target,
                    "target already running; not launching"
                );
                report.suppressed.push(target.to_string());
                continue;
            }

            match launcher.launch(target) {
                Ok(handle) => {
                    info!(
                        trigger = pair.trigger_identifier(),
                        launch = target,
                        pid = handle.pid,
                        "launched"
                    );
                    report.launched.push((target.to_string(), handle));
                }
                Err(e) => {
                    warn!(trigger = pair.trigger_identifier(), error = %e, "launch failed");
                    report.failures.push(e);
                }
            }
        }

        let live: HashSet<&PairKey> = keys.iter().collect();
        self.fired.retain(|k, _| live.contains(k));
        report
    }

    /// Whether the pair at `index` of `pairs` has fired in its current episode.
    #[cfg(test)]
    pub fn is_fired(&self, pairs: &[WatchPair], index: usize) -> bool {
        keys_for(pairs)
            .get(index)
            .and_then(|k| self.fired.get(k))
            .copied()
            .unwrap_or(false)
    }
}

fn keys_for(pairs: &[WatchPair]) -> Vec<PairKey> {
    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    pairs
        .iter()
        .map(|p| {
            let trigger = p.trigger_identifier().to_lowercase();
            let launch = p.launch_target().to_string();
            let ordinal = seen.entry((trigger.clone(), launch.clone())).or_insert(0);
            let key = PairKey {
                trigger,
                launch,
                ordinal: *ordinal,
            };
            *ordinal += 1;
            key
        })
        .collect()
}
