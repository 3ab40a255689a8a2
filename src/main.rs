use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use friction_lens::{
    config::{Config, LogFormat},
    detector::{replay_signals, FrictionDispatcher, ReporterHandle},
    events::RawSignal,
    external::SentryClient,
    ingest::{IngestService, IngestSink},
    server::{AppState, McpServer},
    session::{FileSessionStore, SessionIdentity},
    storage::{SqliteStorage, Storage},
    tracker::{EventTracker, HttpIngestClient},
};

#[derive(Parser, Debug)]
#[command(name = "friction-lens", version, about = "Friction detection and incident correlation")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Serve MCP tools over stdio (default)
    Serve,

    /// Analyze a session's latest (or a given) incident and print the report
    Analyze {
        #[arg(long)]
        session: String,

        #[arg(long)]
        incident: Option<String>,
    },

    /// Print a Playwright repro script for a session
    Repro {
        #[arg(long)]
        session: String,

        /// Most recent events to replay
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Run recorded raw signals (JSON lines) through the detector and tracker
    Replay {
        #[arg(long)]
        file: PathBuf,

        /// Persist the session identity in this file
        #[arg(long)]
        session_file: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config);

    info!(version = env!("CARGO_PKG_VERSION"), "Friction Lens starting...");

    let storage = match SqliteStorage::new(&config.database).await {
        Ok(s) => {
            info!(path = %config.database.path.display(), "Database initialized");
            s
        }
        Err(e) => {
            error!(error = %e, "Failed to initialize database");
            return Err(e.into());
        }
    };

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(config, storage).await,
        Command::Analyze { session, incident } => {
            let state = AppState::from_config(config, storage)?;
            let report = state.analysis.analyze(&session, incident.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Command::Repro { session, limit } => {
            let limit = limit.unwrap_or(config.analysis.event_limit);
            let events = storage.get_session_events(&session, limit).await?;
            println!(
                "{}",
                friction_lens::analysis::generate_repro_script(&events, &config.analysis.repro_base_url)
            );
            Ok(())
        }
        Command::Replay { file, session_file } => replay(config, storage, file, session_file).await,
    }
}

async fn serve(config: Config, storage: SqliteStorage) -> anyhow::Result<()> {
    let state = Arc::new(AppState::from_config(config, storage)?);
    let server = McpServer::new(state);

    info!("Server ready, waiting for requests on stdin...");

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}

async fn replay(
    config: Config,
    storage: SqliteStorage,
    file: PathBuf,
    session_file: Option<PathBuf>,
) -> anyhow::Result<()> {
    let raw = tokio::fs::read_to_string(&file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let signals = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(n, line)| {
            serde_json::from_str::<RawSignal>(line)
                .with_context(|| format!("{}:{}: invalid signal", file.display(), n + 1))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    let identity = match session_file {
        Some(path) => SessionIdentity::new(Arc::new(FileSessionStore::new(path))),
        None => SessionIdentity::in_memory(),
    };

    let sink: Arc<dyn IngestSink> = match &config.tracker.endpoint {
        Some(endpoint) => Arc::new(HttpIngestClient::new(endpoint.clone(), &config.request)?),
        None => Arc::new(IngestService::new(storage)),
    };
    let tracker = EventTracker::new(config.tracker.clone(), identity, sink);

    let mut dispatcher = FrictionDispatcher::new(tracker.clone());
    if config.sentry.capture_enabled() {
        let sentry = SentryClient::new(&config.sentry, config.request.clone())?;
        let (reporter, ready) = ReporterHandle::new(
            Arc::new(sentry),
            Duration::from_millis(config.detector.reporter_ready_timeout_ms),
        );
        ready.mark_ready();
        dispatcher = dispatcher.with_reporter(reporter);
    }

    info!(signals = signals.len(), session_id = %tracker.session_id(), "Replaying signals");
    let delivered = replay_signals(&config.detector, signals, &dispatcher).await;
    // A friction flush may still be in flight
    let mut ack = tracker.shutdown().await;
    while tracker.buffered() > 0 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        ack = tracker.flush().await.or(ack);
    }

    println!("{}", serde_json::to_string_pretty(&delivered)?);
    if let Some(incident_id) = ack.and_then(|r| r.incident_id) {
        info!(incident_id = %incident_id, "Incident created");
    }
    Ok(())
}

/// Initialize tracing/logging
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
