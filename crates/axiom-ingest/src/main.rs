//! Streams NDJSON events from stdin into an Axiom dataset.
//!
//! Usage: `axiom-ingest [config.toml] < events.ndjson`
//!
//! Lines that are not JSON objects are skipped with a warning. Rejected
//! events are logged individually. Exits with status 1 on error and 2 if
//! the server rejected some events.

mod config;

use axiom_client::{
    CancellationToken, ChannelOptions, Client, Event, IngestOptions, IngestStatus,
};
use config::{Config, ConfigError};
use std::process::ExitCode;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Error)]
enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("axiom: {0}")]
    Client(#[from] axiom_client::Error),

    #[error("failed to read stdin: {0}")]
    Stdin(#[from] std::io::Error),

    #[error("stdin reader task failed: {0}")]
    Reader(#[from] tokio::task::JoinError),
}

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("AXIOM_INGEST_CONFIG") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

fn init_tracing(config: &config::LoggingConfig) {
    let filter = EnvFilter::try_new(&config.level).unwrap_or_else(|_| EnvFilter::new("info"));
    // Stdout is left alone; logs go to stderr.
    if config.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

fn build_client(config: &Config) -> Result<Client, axiom_client::Error> {
    let axiom = &config.axiom;
    let mut builder = Client::builder();
    if let Some(url) = &axiom.url {
        builder = builder.with_url(url);
    }
    if let Some(token) = &axiom.token {
        builder = builder.with_token(token);
    }
    if let Some(org_id) = &axiom.org_id {
        builder = builder.with_org_id(org_id);
    }
    if let Some(edge_url) = &axiom.edge_url {
        builder = builder.with_edge_url(edge_url);
    }
    builder
        .with_user_agent(format!("axiom-ingest/{}", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Reads stdin line by line and forwards every JSON object to `tx`.
/// Returns the number of events forwarded.
async fn read_events(tx: mpsc::Sender<Event>) -> Result<u64, std::io::Error> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut line_no = 0u64;
    let mut sent = 0u64;
    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Event>(&line) {
            Ok(event) => {
                if tx.send(event).await.is_err() {
                    // The ingest loop stopped; its error is reported there.
                    break;
                }
                sent += 1;
            }
            Err(e) => tracing::warn!(line = line_no, error = %e, "skipping invalid event"),
        }
    }
    Ok(sent)
}

async fn run(config: Config) -> Result<IngestStatus, RunError> {
    let dataset = config
        .axiom
        .dataset
        .clone()
        .ok_or(ConfigError::MissingDataset)?;
    let client = build_client(&config)?;

    let channel = ChannelOptions::default()
        .with_batch_size(config.ingest.batch_size)
        .with_flush_interval(config.ingest.flush_interval());
    let mut options = IngestOptions::new();
    if let Some(field) = &config.ingest.timestamp_field {
        options = options.timestamp_field(field);
    }

    let (tx, rx) = mpsc::channel(config.ingest.batch_size.max(1));
    let reader = tokio::spawn(read_events(tx));

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, stopping ingest");
            on_signal.cancel();
        }
    });

    tracing::info!(
        dataset = %dataset,
        batch_size = channel.batch_size,
        flush_interval_ms = config.ingest.flush_interval_ms,
        "ingesting events from stdin"
    );
    let status = client
        .datasets()
        .ingest_channel_with(&dataset, rx, channel, &options, cancel)
        .await?;

    let read = reader.await??;
    tracing::info!(
        read,
        ingested = status.ingested,
        failed = status.failed,
        processed_bytes = status.processed_bytes,
        "ingest finished"
    );
    Ok(status)
}

#[tokio::main]
async fn main() -> ExitCode {
    let (config_path, config_source) = resolve_config_path();

    let config = match config::load_config(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("axiom-ingest: {e}");
            return ExitCode::FAILURE;
        }
    };
    init_tracing(&config.logging);

    tracing::info!(
        source = config_source,
        path = config_path.as_deref().unwrap_or("<none>"),
        "resolved configuration path"
    );

    match run(config).await {
        Ok(status) if status.is_partial() => {
            for failure in &status.failures {
                tracing::warn!(
                    timestamp = %failure.timestamp,
                    error = %failure.error,
                    "event rejected"
                );
            }
            ExitCode::from(2)
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            if let RunError::Client(client_err) = &e {
                if let Some(status) = client_err.ingest_status() {
                    tracing::warn!(
                        ingested = status.ingested,
                        failed = status.failed,
                        "ingest stopped early"
                    );
                }
            }
            tracing::error!(error = %e, "ingest failed");
            ExitCode::FAILURE
        }
    }
}
