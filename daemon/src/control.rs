/// Line-oriented control surface: the console stand-in for a tray menu.
///
/// Each stdin line is parsed into a [`ControlCommand`] and forwarded to the
/// daemon's event loop, which runs it against the engine with [`execute`].
use std::io::BufRead;
use std::str::FromStr;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::debug;

use crate::engine::Engine;
use crate::error::RegistryError;
use crate::event::DaemonEvent;
use crate::pair::WatchPair;

pub const HELP: &str = "\
Commands:
  start                    start watching
  stop                     stop watching
  toggle                   start or stop watching
  pause                    keep the loop alive but launch nothing
  resume                   launch again after a pause
  status                   show watcher status
  list                     list watch pairs
  add <trigger> <launch>   add a pair (quote paths containing spaces)
  remove <index>           remove the pair shown at <index> by `list`
  help                     show this text
  quit                     stop watching and exit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    Start,
    Stop,
    Toggle,
    Pause,
    Resume,
    Status,
    List,
    Add { trigger: String, launch: String },
    Remove(usize),
    Help,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command: {0}")]
    Unknown(String),
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unbalanced quotes")]
    Quotes,
}

impl FromStr for ControlCommand {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words = shell_words::split(line).map_err(|_| ParseCommandError::Quotes)?;
        let Some((verb, args)) = words.split_first() else {
            return Err(ParseCommandError::Empty);
        };

        let bare = |cmd: ControlCommand, usage: &'static str| {
            if args.is_empty() {
                Ok(cmd)
            } else {
                Err(ParseCommandError::Usage(usage))
            }
        };

        match verb.to_lowercase().as_str() {
            "start" => bare(ControlCommand::Start, "start"),
            "stop" => bare(ControlCommand::Stop, "stop"),
            "toggle" => bare(ControlCommand::Toggle, "toggle"),
            "pause" => bare(ControlCommand::Pause, "pause"),
            "resume" => bare(ControlCommand::Resume, "resume"),
            "status" => bare(ControlCommand::Status, "status"),
            "list" | "ls" => bare(ControlCommand::List, "list"),
            "help" | "?" => bare(ControlCommand::Help, "help"),
            "quit" | "exit" => bare(ControlCommand::Quit, "quit"),
            "add" => match args {
                [trigger, launch] => Ok(ControlCommand::Add {
                    trigger: trigger.clone(),
                    launch: launch.clone(),
                }),
                _ => Err(ParseCommandError::Usage("add <trigger> <launch>")),
            },
            "remove" | "rm" => match args {
                [index] => index
                    .parse()
                    .map(ControlCommand::Remove)
                    .map_err(|_| ParseCommandError::Usage("remove <index>")),
                _ => Err(ParseCommandError::Usage("remove <index>")),
            },
            other => Err(ParseCommandError::Unknown(other.to_string())),
        }
    }
}

/// Runs `cmd` against `engine` and returns the text to show the user.
pub fn execute(engine: &Engine, cmd: &ControlCommand) -> String {
    match cmd {
        ControlCommand::Start => match engine.start() {
            Ok(()) => "Status: Watching".to_string(),
            Err(e) => format!("Cannot start: {e}"),
        },
        ControlCommand::Stop => match engine.stop() {
            Ok(()) => "Status: Not Watching".to_string(),
            Err(e) => format!("Cannot stop: {e}"),
        },
        ControlCommand::Toggle => match engine.toggle() {
            Ok(state) => format!("Status: {state}"),
            Err(e) => format!("Cannot toggle: {e}"),
        },
        ControlCommand::Pause => match engine.pause() {
            Ok(()) => "Status: Paused".to_string(),
            Err(e) => format!("Cannot pause: {e}"),
        },
        ControlCommand::Resume => match engine.resume() {
            Ok(()) => "Status: Watching".to_string(),
            Err(e) => format!("Cannot resume: {e}"),
        },
        ControlCommand::Status => format_status(engine),
        ControlCommand::List => format_pairs(&engine.registry_list()),
        ControlCommand::Add { trigger, launch } => match engine.registry_add(trigger, launch) {
            Ok(index) => format!("Added pair {index}"),
            Err(e @ RegistryError::Io { .. }) => format!("Added, but not saved: {e}"),
            Err(e) => format!("Cannot add: {e}"),
        },
        ControlCommand::Remove(index) => match engine.registry_remove(*index) {
            Ok(pair) => format!("Removed {}", pair.label()),
            Err(e @ RegistryError::Io { .. }) => format!("Removed, but not saved: {e}"),
            Err(e) => format!("Cannot remove: {e}"),
        },
        ControlCommand::Help => HELP.to_string(),
        ControlCommand::Quit => "Shutting down".to_string(),
    }
}

/// One line per pair, prefixed with the index `remove` expects.
pub fn format_pairs(pairs: &[WatchPair]) -> String {
    if pairs.is_empty() {
        return "No pairs configured.".to_string();
    }
    pairs
        .iter()
        .enumerate()
        .map(|(i, p)| {
            format!(
                "{i:>3}  {}\n       trigger: {}\n       launch:  {}",
                p.label(),
                p.trigger_identifier(),
                p.launch_target()
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_status(engine: &Engine) -> String {
    let report = engine.report();
    let mut out = format!("Status: {} ({} pairs)", report.state, report.pair_count);
    if let (Some(target), Some(at)) = (&report.last_launch_target, &report.last_launch_timestamp) {
        out.push_str(&format!("\nLast launch: {target} at {at}"));
    }
    if let Some(error) = &report.error {
        out.push_str(&format!("\nLast error: {error}"));
    }
    out
}

/// Reads commands from stdin on a dedicated thread and forwards them to `tx`.
/// Parse errors are answered directly. EOF ends the console but leaves the
/// daemon running, so it can be started detached with `--silent`.
pub fn spawn_console(tx: mpsc::Sender<DaemonEvent>) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("console".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                if line.trim().is_empty() {
                    continue;
                }
                match line.parse::<ControlCommand>() {
                    Ok(cmd) => {
                        if tx.blocking_send(DaemonEvent::Command(cmd)).is_err() {
                            break;
                        }
                    }
                    Err(e) => println!("{e}\n{HELP}"),
                }
            }
            debug!("console input closed");
        })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edge::tests::RecordingLauncher;
    use crate::registry::Registry;
    use std::sync::Arc;

    fn parse(line: &str) -> Result<ControlCommand, ParseCommandError> {
        line.parse()
    }

    // ── parsing ───────────────────────────────────────────────────────────────

    #[test]
    fn parses_bare_verbs_case_insensitively() {
        assert_eq!(parse("start"), Ok(ControlCommand::Start));
        assert_eq!(parse("  STOP "), Ok(ControlCommand::Stop));
        assert_eq!(parse("Pause"), Ok(ControlCommand::Pause));
        assert_eq!(parse("resume"), Ok(ControlCommand::Resume));
        assert_eq!(parse("toggle"), Ok(ControlCommand::Toggle));
        assert_eq!(parse("ls"), Ok(ControlCommand::List));
        assert_eq!(parse("exit"), Ok(ControlCommand::Quit));
    }

    #[test]
    fn parses_add_with_quoted_paths() {
        assert_eq!(
            parse(r#"add "C:/Program Files/Steam/steam.exe" 'C:/Tools/obs 64.exe'"#),
            Ok(ControlCommand::Add {
                trigger: "C:/Program Files/Steam/steam.exe".to_string(),
                launch: "C:/Tools/obs 64.exe".to_string(),
            })
        );
    }

    #[test]
    fn add_requires_two_arguments() {
        assert_eq!(
            parse("add notepad.exe"),
            Err(ParseCommandError::Usage("add <trigger> <launch>"))
        );
    }

    #[test]
    fn parses_remove_index() {
        assert_eq!(parse("remove 2"), Ok(ControlCommand::Remove(2)));
        assert_eq!(parse("remove -1"), Err(ParseCommandError::Usage("remove <index>")));
        assert_eq!(parse("remove"), Err(ParseCommandError::Usage("remove <index>")));
    }

    #[test]
    fn rejects_extra_arguments_and_unknown_verbs() {
        assert_eq!(parse("start now"), Err(ParseCommandError::Usage("start")));
        assert_eq!(parse("launch"), Err(ParseCommandError::Unknown("launch".to_string())));
        assert_eq!(parse(""), Err(ParseCommandError::Empty));
        assert_eq!(parse("add \"unterminated"), Err(ParseCommandError::Quotes));
    }

    // ── formatting ────────────────────────────────────────────────────────────

    #[test]
    fn format_pairs_empty() {
        assert_eq!(format_pairs(&[]), "No pairs configured.");
    }

    #[test]
    fn format_pairs_shows_index_and_full_paths() {
        let pairs = vec![WatchPair::new(r"C:\Games\game.exe", r"C:\Tools\obs.exe").unwrap()];
        let out = format_pairs(&pairs);
        assert!(out.starts_with("  0  Watch: game.exe → obs.exe"));
        assert!(out.contains(r"trigger: C:\Games\game.exe"));
        assert!(out.contains(r"launch:  C:\Tools\obs.exe"));
    }

    // ── execute ───────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn execute_drives_engine() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::builder(Registry::new(dir.path().join("pairs.toml")))
            .launcher(Arc::new(RecordingLauncher::default()))
            .build();

        assert_eq!(
            execute(&engine, &ControlCommand::Start),
            "Cannot start: no pairs configured"
        );
        assert_eq!(
            execute(
                &engine,
                &ControlCommand::Add {
                    trigger: "notepad.exe".to_string(),
                    launch: "calc.exe".to_string(),
                }
            ),
            "Added pair 0"
        );
        assert_eq!(execute(&engine, &ControlCommand::Start), "Status: Watching");
        assert_eq!(execute(&engine, &ControlCommand::Pause), "Status: Paused");
        assert!(execute(&engine, &ControlCommand::Status).starts_with("Status: Paused (1 pairs)"));
        assert_eq!(execute(&engine, &ControlCommand::Toggle), "Status: Not Watching");
        assert_eq!(
            execute(&engine, &ControlCommand::Resume),
            "Cannot resume: not watching"
        );
        assert_eq!(
            execute(&engine, &ControlCommand::Remove(3)),
            "Cannot remove: no pair at index 3 (registry holds 1)"
        );
        assert_eq!(
            execute(&engine, &ControlCommand::Remove(0)),
            "Removed Watch: notepad.exe → calc.exe"
        );
    }

    #[tokio::test]
    async fn add_reports_index_of_new_pair() {
        let dir = tempfile::tempdir().unwrap();
        let engine = Engine::builder(Registry::new(dir.path().join("pairs.toml")))
            .launcher(Arc::new(RecordingLauncher::default()))
            .build();
        let add = |trigger: &str| ControlCommand::Add {
            trigger: trigger.to_string(),
            launch: "obs.exe".to_string(),
        };

        assert_eq!(execute(&engine, &add("a.exe")), "Added pair 0");
        assert_eq!(execute(&engine, &add("b.exe")), "Added pair 1");
        execute(&engine, &ControlCommand::Remove(0));
        assert_eq!(execute(&engine, &add("c.exe")), "Added pair 1");
    }
}
