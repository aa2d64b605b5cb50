//! stagehook-replay - Replay recorded hook events against a headless scene
//!
//! Reads a script of server events, feeds it through the same registry and
//! dispatcher the browser uses, resolves asset loads from a catalog, and
//! prints every event the scene pushes back as a JSON line.

mod catalog;
mod runner;
mod script;

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use stagehook_core::load_config;

#[derive(Parser, Debug)]
#[command(name = "stagehook-replay")]
#[command(about = "Replay recorded hook events against a headless scene")]
#[command(version)]
struct Args {
    /// Script of events, one JSON object per line
    #[arg(short, long)]
    script: PathBuf,

    /// Asset catalog (TOML) describing loadable models and textures
    #[arg(short, long)]
    assets: Option<PathBuf>,

    /// Path to configuration file
    #[arg(short, long, default_value = "stagehook.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr so stdout stays machine readable
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("stagehook-replay v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config(&args.config)?;
    let catalog = catalog::load_catalog(args.assets.as_deref())?;
    let content = std::fs::read_to_string(&args.script)
        .with_context(|| format!("reading {}", args.script.display()))?;
    let lines = script::parse_script(&content)?;

    let mut replay = runner::Replay::new(config, catalog)?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for (number, line) in lines {
        for event in replay.run_line(line) {
            let json = serde_json::to_string(&event)?;
            writeln!(out, "{}", json)?;
        }
        tracing::trace!(line = number, "Line replayed");
    }
    out.flush()?;

    let summary = replay.finish();
    info!(
        events = summary.events,
        rejected = summary.rejected,
        loads = summary.loads,
        "Done"
    );
    Ok(())
}
