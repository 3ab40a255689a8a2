//! # Friction Lens
//!
//! Detects user friction in interaction telemetry and turns it into
//! diagnosable incidents.
//!
//! ## Features
//!
//! - **Friction detection**: rage clicks, dead clicks, error loops and
//!   navigation backtracking from a raw signal stream
//! - **Telemetry tracking**: buffered, batched event delivery
//! - **Ingestion**: incident creation and success signals from batches
//! - **Correlation**: bounded polling for the incident and its backend error
//! - **Root-cause ranking**: heuristic component scoring
//! - **Repro scripts**: Playwright tests synthesized from the action log
//!
//! ## Architecture
//!
//! ```text
//! RawSignal → FrictionDetector → EventTracker → IngestService → SQLite
//!                                                      ↓
//!        Sentry ← IncidentCorrelator ← AnalysisService → Gemini, SurveyMonkey
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use friction_lens::{Config, AppState, McpServer};
//! use friction_lens::storage::SqliteStorage;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let storage = SqliteStorage::new(&config.database).await?;
//!     let state = Arc::new(AppState::from_config(config, storage)?);
//!     McpServer::new(state).run().await?;
//!     Ok(())
//! }
//! ```

/// Root-cause ranking, repro scripts and the analysis pipeline.
pub mod analysis;
/// Configuration loaded from the environment.
pub mod config;
/// Incident and external error correlation.
pub mod correlator;
/// Client-side friction pattern detection.
pub mod detector;
/// Error types and result aliases for the application.
pub mod error;
/// Telemetry and friction event types.
pub mod events;
/// Clients for the error tracker, report generator and survey collector.
pub mod external;
/// Telemetry batch ingestion.
pub mod ingest;
/// Prompt templates for report generation.
pub mod prompts;
/// MCP server implementation and request handling.
pub mod server;
/// Per-browser session identity.
pub mod session;
/// SQLite storage layer for persistence.
pub mod storage;
/// Buffered telemetry tracker.
pub mod tracker;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use server::{AppState, McpServer, SharedState};
