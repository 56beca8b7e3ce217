/// Detached process launch.
///
/// The engine fires and forgets: the returned [`ProcessHandle`] is informational
/// only and the child's lifetime is never owned or awaited by the engine.
///
/// A target is either the path of an executable or a command line. A string
/// that names an existing file, or contains no whitespace, is run as-is, so
/// plain paths need no quoting; anything else is split shell-style into
/// program and arguments. Windows paths inside a command line must be quoted
/// to keep their backslashes.
use std::io;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::debug;

use crate::error::LaunchError;

/// Identifies a process that was started. Dropping it has no effect on the child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
}

/// Capability to start a launch target.
pub trait Launcher: Send + Sync {
    fn launch(&self, target: &str) -> Result<ProcessHandle, LaunchError>;
}

/// Starts targets as real OS processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemLauncher;

#[cfg(windows)]
const DETACHED_PROCESS: u32 = 0x0000_0008;

/// Splits `target` into the program to run and its arguments.
pub fn split_command(target: &str) -> Result<(String, Vec<String>), LaunchError> {
    if Path::new(target).is_file() || !target.contains(char::is_whitespace) {
        return Ok((target.to_string(), Vec::new()));
    }
    let invalid = || LaunchError {
        target: target.to_string(),
        source: io::Error::new(io::ErrorKind::InvalidInput, "unparsable command line"),
    };
    let mut words = shell_words::split(target).map_err(|_| invalid())?.into_iter();
    let program = words.next().ok_or_else(invalid)?;
    Ok((program, words.collect()))
}

/// The executable part of `target`, used when checking whether the target is
/// already running.
pub fn program_of(target: &str) -> String {
    split_command(target)
        .map(|(program, _)| program)
        .unwrap_or_else(|_| target.to_string())
}

impl Launcher for SystemLauncher {
    fn launch(&self, target: &str) -> Result<ProcessHandle, LaunchError> {
        let (program, args) = split_command(target)?;
        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        // Run from the program's own directory, like a desktop shortcut would.
        if let Some(dir) = Path::new(&program).parent() {
            if dir.is_dir() {
                cmd.current_dir(dir);
            }
        }

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            cmd.creation_flags(DETACHED_PROCESS);
        }

        let child = cmd.spawn().map_err(|source| LaunchError {
            target: target.to_string(),
            source,
        })?;
        let handle = ProcessHandle { pid: child.id() };
        debug!(launch = target, pid = handle.pid, "spawned");

        // Reap in the background so an exited child does not linger as a
        // zombie that still shows up in process snapshots.
        #[cfg(unix)]
        {
            let mut child = child;
            let spawned = std::thread::Builder::new()
                .name("launch-reaper".into())
                .spawn(move || {
                    let _ = child.wait();
                });
            if let Err(e) = spawned {
                debug!(error = %e, "could not start reaper thread");
            }
        }
        #[cfg(not(unix))]
        drop(child);

        Ok(handle)
    }
}
