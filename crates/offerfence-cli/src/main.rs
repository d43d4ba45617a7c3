//! offerfence - headless driver for the geofence offer engine.
//!
//! Reads location fixes, region callbacks and push payloads from stdin, one
//! command per line, and runs them through the engine against the live
//! backend. Notifications and region monitoring are logged.

mod commands;

use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use offerfence_core::{
    ApiClient, Config, GeoOfferService, JsonFilePersistence, LogNotificationSender,
    LogRegionMonitor, RegionEvent, SystemClock,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::{Command, HELP};

// ============================================================================
// Constants
// ============================================================================

const LOG_FILE: &str = "offerfence.log";

/// Initialize tracing: stderr plus a log file in the cache directory.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the program.
fn init_tracing(log_dir: &Path) -> WorkerGuard {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_appender = tracing_appender::rolling::never(log_dir, LOG_FILE);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(io::stderr))
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .init();

    guard
}

fn load_config() -> Result<Config> {
    let mut config = Config::load().context("Failed to load config")?;
    config.apply_env_overrides();
    if config.ensure_device_id() {
        config.save().context("Failed to save generated device id")?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let config = load_config()?;
    let cache_dir = config.cache_dir().context("Failed to resolve cache directory")?;
    std::fs::create_dir_all(&cache_dir)
        .with_context(|| format!("Failed to create {}", cache_dir.display()))?;

    let _log_guard = init_tracing(&cache_dir);
    info!(device_id = %config.device_id, api = config.api_url(), "offerfence starting");
    if !config.has_credentials() {
        warn!("No registration code or auth token configured, backend calls will fail");
    }

    let transport = ApiClient::new(&config).context("Failed to build HTTP client")?;
    let persistence =
        JsonFilePersistence::new(cache_dir).context("Failed to open state directory")?;
    let service = GeoOfferService::new(
        config,
        Arc::new(transport),
        Arc::new(persistence),
        Arc::new(LogNotificationSender),
        Arc::new(LogRegionMonitor),
        Arc::new(SystemClock),
    );

    service.load().await;
    let tasks = service.spawn_background_tasks();

    let result = run(&service).await;

    for task in tasks {
        task.abort();
    }
    service.save().await.context("Failed to save engine state")?;
    info!("offerfence shutting down");
    result
}

/// Command loop until `quit`, end of input or Ctrl-C.
async fn run(service: &GeoOfferService) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                return Ok(());
            }
        };
        let Some(line) = line else {
            return Ok(());
        };
        if line.trim().is_empty() {
            continue;
        }

        match Command::parse(&line) {
            Ok(Command::Quit) => return Ok(()),
            Ok(command) => execute(service, command).await,
            Err(e) => eprintln!("{}", e),
        }
    }
}

async fn execute(service: &GeoOfferService, command: Command) {
    match command {
        Command::Location(location) => {
            let report = service.on_location_update(location).await;
            println!(
                "entered={:?} exited={:?} delivered={:?} notified={:?}",
                report.entered, report.exited, report.delivered, report.notified
            );
        }
        Command::Enter(key) => {
            let report = service.on_region_event(&key, RegionEvent::Enter).await;
            println!("entered={:?} delivered={:?}", report.entered, report.delivered);
        }
        Command::Exit(key) => {
            let report = service.on_region_event(&key, RegionEvent::Exit).await;
            println!("exited={:?}", report.exited);
        }
        Command::Push(payload) => match service.handle_push_payload(&payload).await {
            Ok(Some(update)) => println!("applied {:?}", update),
            Ok(None) => println!("waiting for remaining message parts"),
            Err(e) => eprintln!("Push rejected: {}", e),
        },
        Command::Redeem(campaign_id) => {
            if service.redeem_coupon(campaign_id).await {
                println!("campaign {} redeemed", campaign_id);
            } else {
                println!("unknown campaign {}", campaign_id);
            }
        }
        Command::Refresh => {
            let location = service.with_processor(|p| p.last_location()).await;
            match location {
                Some(location) => {
                    if let Err(e) = service.retrieve_nearby_offers(location).await {
                        eprintln!("Refresh failed: {}", e);
                    }
                }
                None => eprintln!("No location yet"),
            }
        }
        Command::Flush => match service.flush_tracking().await {
            Ok(count) => println!("uploaded {} events", count),
            Err(e) => eprintln!("Upload failed: {}", e),
        },
        Command::Background => service.on_background().await,
        Command::Save => {
            if let Err(e) = service.save().await {
                error!(error = %e, "Save failed");
            }
        }
        Command::Status => {
            let status = service.status().await;
            println!("{:#?}", status);
        }
        Command::Reset => {
            if let Err(e) = service.reset().await {
                error!(error = %e, "Reset failed");
            }
        }
        Command::Help => println!("{}", HELP),
        Command::Quit => {}
    }
}
