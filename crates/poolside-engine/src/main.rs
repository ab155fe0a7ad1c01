//! Engine binary for the Poolside workload bench.
//!
//! Wires the core world orchestration to the outside: loads
//! configuration, initializes structured logging, builds the event
//! stream publisher, boots the first world, and then serves a
//! line-oriented control stream on stdin (one event name per line)
//! until EOF or Ctrl-C.
//!
//! Logs go to stderr; the event stream is mirrored to stdout as JSON
//! lines, so a dashboard (or `jq`) can consume the metrics feed
//! without scraping log output.
//!
//! # Startup sequence
//!
//! 1. Load configuration from `poolside-config.yaml` (defaults when
//!    absent; `MIN_POOL`/`MAX_POOL` env overrides always apply)
//! 2. Initialize structured logging (tracing)
//! 3. Build the broadcast event stream and its stdout mirror
//! 4. Boot the initial world via the control handler
//! 5. Run the control loop
//! 6. Tear down and exit

mod error;
mod event_stream;
mod handler;

use std::path::Path;
use std::sync::Arc;

use poolside_core::config::BenchConfig;
use tokio::io::AsyncBufReadExt;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::EngineError;
use crate::event_stream::EventStreamPublisher;
use crate::handler::SimulationHandler;

/// Application entry point for the bench engine.
///
/// # Errors
///
/// Returns an error if configuration loading or the control stream
/// fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration (before logging, so the configured level
    //    can serve as the filter fallback).
    let config_path = Path::new("poolside-config.yaml");
    let from_file = config_path.exists();
    let config = load_config(config_path, from_file)?;

    // 2. Initialize structured logging on stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    info!("poolside-engine starting");
    info!(
        name = config.world.name,
        min_pool = config.pool.min,
        max_pool = config.pool.max,
        from_file,
        "configuration loaded"
    );

    // 3. Event stream plus its stdout mirror.
    let publisher = Arc::new(EventStreamPublisher::new());
    spawn_stdout_mirror(publisher.subscribe());

    // 4. Boot the initial world.
    let mut handler = SimulationHandler::new(config, Arc::clone(&publisher));
    handler.handle_event("start").await;

    // 5. Control loop: one event name per stdin line.
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    loop {
        tokio::select! {
            result = lines.next_line() => match result {
                Ok(Some(line)) => {
                    let name = line.trim();
                    if !name.is_empty() {
                        handler.handle_event(name).await;
                    }
                }
                Ok(None) => {
                    info!("control stream closed");
                    break;
                }
                Err(source) => return Err(EngineError::Io { source }.into()),
            },
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                break;
            }
        }
    }

    // 6. Tear down.
    handler.shutdown().await;
    info!("poolside-engine shutdown complete");
    Ok(())
}

/// Load the bench configuration, falling back to defaults when the
/// file is absent. Env overrides apply on both paths.
fn load_config(path: &Path, from_file: bool) -> Result<BenchConfig, EngineError> {
    if from_file {
        Ok(BenchConfig::from_file(path)?)
    } else {
        let mut config = BenchConfig::default();
        config.pool.apply_env_overrides();
        Ok(config)
    }
}

/// Mirror every world event to stdout as one JSON line.
fn spawn_stdout_mirror(mut rx: broadcast::Receiver<poolside_types::WorldEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(line) => println!("{line}"),
                    Err(err) => warn!(error = %err, "failed to serialize world event"),
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "event mirror lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    });
}
