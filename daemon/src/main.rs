use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::sync::mpsc;
use tracing::{info, warn};

use launchwatch::config::{self, Config};
use launchwatch::control::{self, ControlCommand};
use launchwatch::event::DaemonEvent;
use launchwatch::paths::AppPaths;
use launchwatch::{Engine, Registry, WatchPair};

#[derive(Parser, Debug)]
#[command(name = "launchwatch", version)]
#[command(about = "Starts a companion program whenever a trigger program starts running")]
struct Args {
    /// Directory holding config.toml, pairs.toml and status.toml
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Start watching immediately instead of waiting for `start`
    #[arg(long)]
    silent: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the watcher with a console control surface (the default)
    Run,
    /// Print the configured pairs
    List,
    /// Add a pair: launch LAUNCH whenever TRIGGER starts running
    Add { trigger: String, launch: String },
    /// Remove the pair at INDEX (as shown by `list`)
    Remove { index: usize },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let paths = AppPaths::resolve(args.data_dir.as_deref());

    match args.command.unwrap_or(Command::Run) {
        Command::Run => run(paths, args.silent).await,
        Command::List => {
            let registry = Registry::open(paths.pairs_file());
            println!("{}", control::format_pairs(registry.pairs()));
            Ok(())
        }
        Command::Add { trigger, launch } => {
            let mut registry = Registry::open(paths.pairs_file());
            let index = registry.add(WatchPair::new(trigger, launch)?)?;
            println!("Added pair {index}");
            Ok(())
        }
        Command::Remove { index } => {
            let mut registry = Registry::open(paths.pairs_file());
            let removed = registry.remove(index)?;
            println!("Removed {}", removed.label());
            Ok(())
        }
    }
}

async fn run(paths: AppPaths, silent: bool) -> Result<()> {
    // ── App data directory ────────────────────────────────────────────────────
    std::fs::create_dir_all(paths.dir()).with_context(|| {
        format!("Failed to create app data directory {}", paths.dir().display())
    })?;

    // ── Configuration ─────────────────────────────────────────────────────────
    let config_path = paths.config_file();
    let initial_config = config::load_or_default(&config_path).unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "using default config");
        Config::default()
    });

    // ── Engine ────────────────────────────────────────────────────────────────
    let engine = Engine::builder(Registry::open(paths.pairs_file()))
        .settings(initial_config.watch.to_settings())
        .status_file(paths.status_file())
        .build();

    let (event_tx, mut event_rx) = mpsc::channel::<DaemonEvent>(32);

    // ── Background tasks ──────────────────────────────────────────────────────
    tokio::spawn(config::watch_data_files(
        config_path,
        paths.pairs_file(),
        event_tx.clone(),
    ));
    control::spawn_console(event_tx.clone()).context("Failed to start console")?;

    // Graceful shutdown on Ctrl+C.
    {
        let tx = event_tx.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                let _ = tx.send(DaemonEvent::Shutdown).await;
            }
        });
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        dir = %paths.dir().display(),
        "launchwatch started"
    );

    if silent {
        if let Err(e) = engine.start() {
            warn!(error = %e, "cannot start watching");
        }
    } else {
        println!("{}", control::HELP);
    }
    println!("Status: {}", engine.status());

    // ── Event loop ────────────────────────────────────────────────────────────
    while let Some(evt) = event_rx.recv().await {
        match evt {
            DaemonEvent::ConfigReloaded(new_config) => {
                info!("config reloaded");
                engine.update_settings(new_config.watch.to_settings());
            }
            DaemonEvent::PairsChanged => match engine.registry_reload() {
                Ok(true) => info!(pairs = engine.registry_list().len(), "pairs reloaded"),
                // Unreadable files are logged by the engine; the pairs in
                // memory stay in force.
                Ok(false) | Err(_) => {}
            },
            DaemonEvent::Command(ControlCommand::Quit) => {
                println!("{}", control::execute(&engine, &ControlCommand::Quit));
                break;
            }
            DaemonEvent::Command(cmd) => {
                println!("{}", control::execute(&engine, &cmd));
            }
            DaemonEvent::Shutdown => {
                info!("shutting down");
                break;
            }
        }
    }

    engine.shutdown().await;
    Ok(())
}

fn init_tracing(level: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
        .init();

    Ok(())
}
