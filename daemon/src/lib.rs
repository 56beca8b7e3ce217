//! Process presence watcher: launches a companion executable once each time a
//! trigger executable starts running.

pub mod config;
pub mod control;
pub mod edge;
pub mod engine;
pub mod error;
pub mod event;
pub mod launcher;
pub mod pair;
pub mod paths;
pub mod process_monitor;
pub mod registry;
pub mod status;

pub use engine::{Engine, EngineBuilder, WatchSettings};
pub use error::{EngineError, LaunchError, RegistryError};
pub use pair::WatchPair;
pub use process_monitor::MatchBy;
pub use registry::Registry;
pub use status::EngineStatus;
