use crate::config::Config;
use crate::control::ControlCommand;

pub enum DaemonEvent {
    /// The config file changed on disk and was successfully re-parsed.
    ConfigReloaded(Config),
    /// The pairs file was rewritten, possibly by another process.
    PairsChanged,
    /// A command arrived from the console control surface.
    Command(ControlCommand),
    /// Ctrl+C received or `quit` entered; stop watching and exit.
    Shutdown,
}
