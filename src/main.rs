//! ESB Networks smart-meter usage importer
//!
//! This application logs in to the ESB Networks customer portal, downloads the
//! half-hourly consumption export of one or more electricity meters, folds it
//! into hourly statistics and imports them into InfluxDB2.
//!
//! # Architecture
//!
//! Every configured meter (MPRN) gets its own import loop:
//! - A cycle runs immediately at startup and then once per interval (24h by default)
//! - SIGHUP forces an extra cycle for every meter
//! - SIGTERM/SIGINT cancel running cycles and shut down
//!
//! # Features
//!
//! - Full backfill on the first run, delta imports afterwards
//! - Local guard against the portal's daily login limit
//! - Session reuse across cycles
//! - Optional development cache of raw downloads
//! - Reset of a meter's series on startup

mod aggregator;
mod cache;
mod config;
mod dedup;
mod error;
mod esb;
mod importer;
mod influxdb;
mod model;
mod persist;
mod retry;
mod state;

#[cfg(test)]
mod test_utils;

use crate::cache::DevCache;
use crate::config::{EsbConfig, ImporterConfig, InfluxConfig};
use crate::error::Error;
use crate::esb::{EsbPortal, ReadingFetcher, SessionClient};
use crate::importer::{CycleReport, Importer, ImporterParts};
use crate::model::{PortalAuthenticator, ReadingSource, StateStore, StatisticsSink};
use crate::state::FileStateStore;
use anyhow::Context;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::signal::ctrl_c;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::Notify;
use tokio::task::JoinError;
use tokio::time::{self, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Application entry point.
///
/// Loads configuration, builds one importer per meter, and runs the meter
/// loops until a termination signal arrives.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_config = config::load_app_config()?;
    tracing_subscriber::fmt()
        .with_max_level(app_config.log_level())
        .init();

    let esb_config = config::load_esb_config()?;
    let importer_config = config::load_importer_config()?;
    let influx_config = config::load_influx_config()?;
    tracing::debug!("{:?}", esb_config);

    let importers = build_importers(&esb_config, &importer_config, influx_config)?;

    if importer_config.reset_on_start {
        for importer in &importers {
            tracing::warn!(mprn = %importer.mprn(), "IMPORTER_RESET_ON_START is set, resetting series");
            if let Err(e) = importer.reset(Utc::now()).await {
                tracing::error!(mprn = %importer.mprn(), "Failed to reset series: {}", e);
            }
        }
    }

    let shutdown = CancellationToken::new();
    let mut triggers = Vec::with_capacity(importers.len());
    let mut tasks = Vec::with_capacity(importers.len());
    for importer in importers {
        let trigger = Arc::new(Notify::new());
        triggers.push(Arc::clone(&trigger));
        tasks.push((
            importer.mprn().to_string(),
            tokio::spawn(run_meter(
                importer,
                importer_config.interval(),
                trigger,
                shutdown.clone(),
            )),
        ));
    }

    let mut sig_term =
        signal(SignalKind::terminate()).context("Failed to register SIGTERM handler")?;
    let mut sig_hup = signal(SignalKind::hangup()).context("Failed to register SIGHUP handler")?;
    tracing::info!(
        "Running for {} meter(s)... Send SIGHUP to import now, Ctrl-C or SIGTERM to terminate.",
        tasks.len()
    );
    loop {
        tokio::select! {
            // Handle SIGTERM for graceful shutdown in containers
            _ = sig_term.recv() => {
                tracing::info!("Received SIGTERM. Exiting...");
                break;
            }
            // Handle Ctrl-C for manual termination
            _ = ctrl_c() => {
                tracing::info!("Received SIGINT. Exiting...");
                break;
            }
            _ = sig_hup.recv() => {
                tracing::info!("Received SIGHUP. Triggering import for all meters...");
                for trigger in &triggers {
                    trigger.notify_one();
                }
            }
        }
    }

    shutdown.cancel();
    for (mprn, task) in tasks {
        handle_task_result(&mprn, task.await);
    }
    Ok(())
}

/// Wires the portal, InfluxDB and state file components into one importer per
/// configured meter.
///
/// The portal adapter, fetcher, sink and state store carry no per-meter
/// state and are shared. Meters under the same portal account share one
/// session client, so they share a session and the account's login budget;
/// state files and cache files are per meter.
fn build_importers(
    esb: &EsbConfig,
    config: &ImporterConfig,
    influx: InfluxConfig,
) -> anyhow::Result<Vec<Arc<Importer>>> {
    let tz = esb.tz()?;
    let portal: Arc<dyn PortalAuthenticator> = Arc::new(EsbPortal::new(esb, config));
    let fetcher: Arc<dyn ReadingSource> = Arc::new(
        ReadingFetcher::new(esb, config, tz).context("Failed to build the ESB download client")?,
    );
    let sink: Arc<dyn StatisticsSink> =
        Arc::new(influxdb::Client::new(influx, config.write_batch_size));
    let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(&config.state_dir));

    if config.dev_cache {
        tracing::warn!(
            "Development cache enabled, downloads are replayed from {}",
            config.cache_dir.display()
        );
    }

    let mut accounts: HashMap<String, Arc<SessionClient>> = HashMap::new();
    let importers: Vec<Arc<Importer>> = esb
        .credentials()
        .into_iter()
        .map(|credentials| {
            let sessions = accounts
                .entry(credentials.email.clone())
                .or_insert_with(|| {
                    Arc::new(SessionClient::new(
                        Arc::clone(&portal),
                        Arc::clone(&store),
                        credentials.email.clone(),
                        config.max_login_attempts,
                        config.retry_policy(),
                    ))
                });
            let parts = ImporterParts {
                sessions: Arc::clone(sessions),
                source: Arc::clone(&fetcher),
                sink: Arc::clone(&sink),
                store: Arc::clone(&store),
                cache: DevCache::new(config.dev_cache, &config.cache_dir, &credentials.mprn),
            };
            Arc::new(Importer::new(credentials, parts, config))
        })
        .collect();

    tracing::info!(
        "Importing {} meter(s) under {} portal account(s)",
        importers.len(),
        accounts.len()
    );
    Ok(importers)
}

/// Runs import cycles for one meter until `shutdown` is cancelled.
///
/// # Arguments
///
/// * `importer` - The meter's importer
/// * `interval` - Time between scheduled cycles; the first cycle runs immediately
/// * `trigger` - Notified to run an extra cycle right away
/// * `shutdown` - Stops the loop and cancels a running cycle
///
/// # Behavior
///
/// - Scheduled and manual cycles go through the same `run_cycle`, so they
///   share the single-flight lock and the login budget
/// - Cycle failures are logged and never end the loop
async fn run_meter(
    importer: Arc<Importer>,
    interval: Duration,
    trigger: Arc<Notify>,
    shutdown: CancellationToken,
) {
    let mut ticker = time::interval(interval.max(Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
            _ = trigger.notified() => {
                tracing::info!(mprn = %importer.mprn(), "Manual import requested");
            }
        }
        let result = importer.run_cycle(Utc::now(), &shutdown).await;
        log_cycle_result(importer.mprn(), &result);
    }
    tracing::debug!(mprn = %importer.mprn(), "Import loop stopped");
}

/// Logs the outcome of a cycle.
///
/// Failures that only resolve by waiting for the portal's login window get a
/// distinct message so operators do not retry by hand.
fn log_cycle_result(mprn: &str, result: &Result<CycleReport, Error>) {
    match result {
        Ok(report) => tracing::info!(mprn = %mprn, "Import cycle finished: {}", report),
        Err(Error::Cancelled) => tracing::info!(mprn = %mprn, "Import cycle cancelled"),
        Err(e @ Error::CycleInProgress { .. }) => tracing::warn!(mprn = %mprn, "{}", e),
        Err(e) if e.requires_operator_wait() => tracing::error!(
            mprn = %mprn,
            "Import cycle failed: {}. Do not retry manually; wait before retrying.",
            e
        ),
        Err(e) => tracing::error!(mprn = %mprn, "Import cycle failed: {}", e),
    }
}

/// Handles the result of a meter task, logging success or failure.
///
/// # Behavior
///
/// - Success is logged at debug level
/// - Failures (panics, cancellation) are logged at error level
fn handle_task_result(mprn: &str, result: Result<(), JoinError>) {
    match result {
        Ok(_) => {
            tracing::debug!("Task for MPRN {} completed.", mprn);
        }
        Err(e) => {
            tracing::error!("Task for MPRN {} failed: {:?}", mprn, e);
        }
    }
}
