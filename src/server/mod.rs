//! Server module for MCP protocol handling.
//!
//! This module provides:
//! - MCP server implementation over stdio
//! - Tool call handlers for ingestion and analysis
//! - Shared application state

mod handlers;
mod mcp;

pub use handlers::*;
pub use mcp::*;

use std::sync::Arc;

use tracing::info;

use crate::analysis::AnalysisService;
use crate::config::Config;
use crate::correlator::IncidentCorrelator;
use crate::error::AppResult;
use crate::external::{ErrorLookup, Escalator, GeminiClient, ReportGenerator, SentryClient, SurveyClient};
use crate::ingest::IngestService;
use crate::storage::SqliteStorage;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Config,
    /// SQLite storage backend.
    pub storage: SqliteStorage,
    /// Telemetry batch ingestion.
    pub ingest: IngestService,
    /// Correlate, rank and report pipeline.
    pub analysis: AnalysisService,
    /// Survey collector for user answers; `None` when not wired.
    pub survey: Option<SurveyClient>,
}

impl AppState {
    /// Assemble state from explicit collaborators.
    pub fn new(
        config: Config,
        storage: SqliteStorage,
        lookup: Arc<dyn ErrorLookup>,
        reporter: Arc<dyn ReportGenerator>,
        escalator: Arc<dyn Escalator>,
    ) -> Self {
        let mut ingest = IngestService::new(storage.clone());
        if config.survey.escalate_success {
            ingest = ingest.with_success_escalator(escalator.clone());
        }
        let correlator = IncidentCorrelator::new(storage.clone(), lookup, config.correlator.clone());
        let analysis = AnalysisService::new(
            storage.clone(),
            correlator,
            reporter,
            escalator,
            config.analysis.clone(),
        );
        Self {
            ingest,
            analysis,
            survey: None,
            storage,
            config,
        }
    }

    /// Attach the client used by `friction_survey_answer`.
    pub fn with_survey(mut self, survey: SurveyClient) -> Self {
        self.survey = Some(survey);
        self
    }

    /// Build state with the HTTP clients described by `config`.
    ///
    /// Unconfigured clients are still constructed; they skip their calls.
    pub fn from_config(config: Config, storage: SqliteStorage) -> AppResult<Self> {
        let sentry = SentryClient::new(&config.sentry, config.request.clone())?;
        let gemini = GeminiClient::new(&config.gemini, config.request.clone())?;
        let survey = SurveyClient::new(&config.survey, config.request.clone())?;

        info!(
            sentry_lookup = config.sentry.lookup_enabled(),
            gemini = gemini.is_configured(),
            survey = survey.is_configured(),
            "External clients initialized"
        );

        Ok(Self::new(
            config,
            storage,
            Arc::new(sentry),
            Arc::new(gemini),
            Arc::new(survey.clone()),
        )
        .with_survey(survey))
    }
}

/// Shared application state handle
pub type SharedState = Arc<AppState>;
