//! tabsync entry point.
//!
//! Logging goes to stderr so `fetch` output on stdout stays machine-readable.

use anyhow::Result;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::sync::Arc;
use tabsync_client::{FetchOutcome, Fetched, ManualVisibility, PollScheduler, SyncClient};
use tabsync_core::{AppConfig, CacheStore, Error, TabKey, TablePayload};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tabsync")]
#[command(about = "Keep published spreadsheet tabs in sync")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Retrieve each source once and print the results as JSON
    Fetch {
        /// Sources as `document:tab` (default: configured sources)
        sources: Vec<String>,
    },

    /// Load all sources, then refresh them on the poll interval until Ctrl-C
    Watch {
        /// Sources as `document:tab` (default: configured sources)
        sources: Vec<String>,
    },
}

/// One line of `fetch` output.
#[derive(Debug, Serialize)]
struct SourceReport<'a> {
    source: String,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<&'a TablePayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl<'a> SourceReport<'a> {
    fn new(key: &TabKey, outcome: &'a FetchOutcome) -> Self {
        let source = key.to_string();
        match outcome {
            Ok(Fetched::Ready(payload)) => {
                Self { source, status: "ready", payload: Some(payload), code: None, message: None }
            }
            Ok(Fetched::Pending) => Self { source, status: "pending", payload: None, code: None, message: None },
            Err(err) => {
                Self { source, status: "error", payload: None, code: Some(err.code()), message: Some(err.to_string()) }
            }
        }
    }
}

fn resolve_sources(config: &AppConfig, sources: &[String]) -> Result<Vec<TabKey>> {
    if sources.is_empty() {
        return Ok(config.require_sources()?);
    }
    let keys = sources.iter().map(|source| TabKey::parse(source)).collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

async fn fetch(client: &SyncClient, keys: &[TabKey]) -> Result<()> {
    let outcomes = client.retrieve_each(keys).await;
    let reports: Vec<_> = keys.iter().zip(&outcomes).map(|(key, outcome)| SourceReport::new(key, outcome)).collect();

    println!("{}", serde_json::to_string_pretty(&reports)?);

    tracing::info!(metrics = ?client.metrics(), "fetch finished");
    Ok(())
}

async fn refresh_all(client: &SyncClient, keys: &[TabKey]) -> Result<(), Error> {
    let results = client.retrieve_many(keys).await?;

    for (key, fetched) in keys.iter().zip(&results) {
        match fetched {
            Fetched::Ready(payload) => {
                tracing::info!(source = %key, rows = payload.row_count(), fetched_at = %payload.fetched_at, "tab ready")
            }
            Fetched::Pending => tracing::info!(source = %key, "tab pending at origin"),
        }
    }

    let metrics = client.metrics();
    tracing::info!(
        requests = metrics.origin_requests,
        hit_rate = metrics.cache_hit_rate_percent,
        stale = metrics.stale_fallbacks,
        "refresh finished"
    );
    Ok(())
}

async fn watch(config: &AppConfig, client: SyncClient, keys: Vec<TabKey>) -> Result<()> {
    refresh_all(&client, &keys).await?;

    let keys = Arc::new(keys);
    let refresh = move || {
        let client = client.clone();
        let keys = Arc::clone(&keys);
        async move { refresh_all(&client, &keys).await }
    };

    let visibility = ManualVisibility::always_visible();
    let scheduler = PollScheduler::new(config.poll_interval(), refresh, &visibility);
    scheduler.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("interrupt received, shutting down");
    scheduler.destroy();

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let args = Args::parse();
    let config = AppConfig::load()?;
    let client = SyncClient::from_config(&config, CacheStore::default())?;

    match args.command {
        Command::Fetch { sources } => {
            let keys = resolve_sources(&config, &sources)?;
            fetch(&client, &keys).await
        }
        Command::Watch { sources } => {
            let keys = resolve_sources(&config, &sources)?;
            tracing::info!(sources = keys.len(), interval_ms = config.poll_interval_ms, "starting watch");
            watch(&config, client, keys).await
        }
    }
}
