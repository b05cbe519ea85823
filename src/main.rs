use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::process;
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hostbridge::app::Pulse;
use hostbridge::config::{self, Config};
use hostbridge::host::{Frontend, HeadlessFrontend, Shell};
use hostbridge::infrastructure::runtime::{BridgeBuilder, BridgeError};
use hostbridge::ui::TerminalFrontend;

#[derive(Debug, Parser)]
#[command(
    name = "hostbridge",
    version,
    about = "Run the Pulse demo on top of the host/runtime bridge"
)]
struct Args {
    /// Config file (defaults to $HOSTBRIDGE_CONFIG or ~/.config/hostbridge/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Print frames to stdout instead of drawing a full-screen UI
    #[arg(long)]
    headless: bool,

    /// Exit after this many clock ticks
    #[arg(long)]
    ticks: Option<u64>,

    /// Raise a fatal signal after this many clock ticks
    #[arg(long)]
    fatal_after: Option<u64>,

    /// Tracing filter, e.g. "hostbridge=debug"
    #[arg(long)]
    log_filter: Option<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => config::load_from(path)?,
        None => config::load(),
    };
    if args.ticks.is_some() {
        config.demo.max_ticks = args.ticks;
    }
    if args.fatal_after.is_some() {
        config.demo.fatal_after = args.fatal_after;
    }
    if args.log_filter.is_some() {
        config.log.filter = args.log_filter.clone();
    }

    init_tracing(&config, args.headless);

    let result = if args.headless {
        let mut frontend = HeadlessFrontend::new(true);
        run(&config, &mut frontend)
    } else {
        let mut frontend = TerminalFrontend::enter()?;
        let result = run(&config, &mut frontend);
        drop(frontend);
        result
    };

    match result {
        Ok(()) => Ok(()),
        Err(err) => {
            if let Some(BridgeError::Fatal(signal)) = err.downcast_ref::<BridgeError>() {
                tracing::error!(%signal, "terminating process");
                eprintln!("{signal}");
                process::exit(signal.code);
            }
            Err(err)
        }
    }
}

fn run(config: &Config, frontend: &mut dyn Frontend) -> Result<()> {
    let bridge = BridgeBuilder::new(&config.runtime).start()?;
    let shell = Shell::<Pulse>::new(config.demo.clone(), bridge, config.host.clone())?;
    let exit = shell.run(frontend)?;
    tracing::info!(cycles = exit.cycles, messages = exit.messages, "demo finished");
    Ok(())
}

fn init_tracing(config: &Config, headless: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.log.filter.as_deref().unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if headless {
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
        return;
    }

    // The terminal UI owns stdout/stderr, so logs go to a file or nowhere.
    let log_file = config::log_file_path(&config.log).and_then(|path| {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).ok()?;
        }
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .ok()
            .map(|file| (path, file))
    });

    match log_file {
        Some((path, file)) => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();
            tracing::info!(path = %path.display(), "logging initialized");
        }
        None => tracing_subscriber::registry().with(env_filter).init(),
    }
}
