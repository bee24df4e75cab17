//! Headless live-interaction runner.
//!
//! Reads newline-delimited JSON events from stdin and writes each reply to
//! stdout as one JSON line. Tracing goes to stderr (and optionally a daily
//! log file) so stdout stays a clean output channel.

use anyhow::Context;
use clap::{Parser, Subcommand};
use livecast::config::LoggingConfig;
use livecast::{LiveConfig, LiveCore, Services};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// How long shutdown waits for replies, synthesis and playback.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Priority-driven reply scheduler for live broadcasts.
#[derive(Parser)]
#[command(name = "livecast", version, about)]
struct Cli {
    /// Path to TOML configuration file. Defaults to
    /// `~/.config/livecast/config.toml` when that file exists.
    #[arg(short, long, env = "LIVECAST_CONFIG")]
    config: Option<PathBuf>,

    /// Narration script, one line per entry, spoken at low priority.
    #[arg(long)]
    script: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Read events from stdin and reply on stdout (default).
    Run,
    /// Print the effective configuration as TOML.
    PrintConfig,
    /// List available audio output devices.
    Devices,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => LiveConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => {
            let path = LiveConfig::default_config_path();
            LiveConfig::load_or_default(&path)
                .with_context(|| format!("loading config from {}", path.display()))?
        }
    };
    let _log_guard = init_tracing(&config.logging);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run(config, cli.script).await,
        Command::PrintConfig => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Devices => list_devices(),
    }
}

/// Stderr logging plus an optional daily-rolled file.
fn init_tracing(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &logging.directory {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "livecast.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(writer),
                )
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry().with(filter).with(stderr).init();
            None
        }
    }
}

async fn run(config: LiveConfig, script: Option<PathBuf>) -> anyhow::Result<()> {
    info!("livecast v{} starting", env!("CARGO_PKG_VERSION"));

    let services = Services::from_config(&config)?;
    let core = Arc::new(LiveCore::start(config, services)?);
    core.set_response_callback(|text, ctx| {
        let line = serde_json::json!({ "reply": text, "context": ctx });
        println!("{line}");
    });

    if let Some(path) = script {
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("reading script {}", path.display()))?;
        let mut queued = 0usize;
        for line in contents.lines().filter(|l| !l.trim().is_empty()) {
            core.enqueue_script(line)?;
            queued += 1;
        }
        info!(queued, "narration script loaded");
    }

    let cancel = CancellationToken::new();
    let scheduler = {
        let core = Arc::clone(&core);
        let cancel = cancel.clone();
        tokio::spawn(async move { core.run(cancel).await })
    };

    let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("received Ctrl+C, shutting down...");
                break;
            }
            line = lines.next_line() => match line? {
                Some(line) if line.trim().is_empty() => {}
                Some(line) => {
                    core.submit_json(&line);
                }
                None => {
                    info!("input closed, shutting down...");
                    break;
                }
            }
        }
    }

    core.shutdown();
    cancel.cancel();
    scheduler.await?;
    if !core.drain(DRAIN_TIMEOUT).await {
        warn!("shutdown deadline reached with work outstanding");
    }

    let status = serde_json::to_string(&core.status())?;
    info!(%status, "livecast stopped");
    Ok(())
}

#[cfg(feature = "cpal-device")]
fn list_devices() -> anyhow::Result<()> {
    println!("Output devices:");
    for name in livecast::audio::playback::CpalDevice::list_output_devices()? {
        println!("  - {name}");
    }
    Ok(())
}

#[cfg(not(feature = "cpal-device"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("device listing requires the cpal-device feature")
}
