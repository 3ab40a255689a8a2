//! Incident analysis pipeline.
//!
//! [`AnalysisService::analyze`] correlates a session's incident with its
//! external error, then derives a repro script, a root-cause ranking and an
//! AI report from the session's recent events. Each stage degrades to an
//! empty result on its own; the incident is written once at the end.

mod ranker;
mod repro;

pub use ranker::{rank_root_causes, RootCauseCandidate};
pub use repro::generate_repro_script;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::AnalysisConfig;
use crate::correlator::IncidentCorrelator;
use crate::error::{AppResult, ToolError};
use crate::events::{TelemetryEvent, TriggerType};
use crate::external::{AiReport, EscalationSummary, Escalator, ExternalErrorRecord, ReportContext, ReportGenerator};
use crate::storage::{IncidentDiagnostics, SqliteStorage, Storage};

/// Trigger label used when the incident's trigger is unknown.
const UNKNOWN_TRIGGER: &str = "friction_detected";

/// Result of one analysis run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    pub sentry: Option<ExternalErrorRecord>,
    pub repro: Option<String>,
    #[serde(rename = "rootCause")]
    pub root_cause: Vec<RootCauseCandidate>,
    pub gemini: Option<AiReport>,
}

/// Runs the correlate, rank, report and persist pipeline.
#[derive(Clone)]
pub struct AnalysisService {
    storage: SqliteStorage,
    correlator: IncidentCorrelator,
    reporter: Arc<dyn ReportGenerator>,
    escalator: Arc<dyn Escalator>,
    config: AnalysisConfig,
}

impl AnalysisService {
    pub fn new(
        storage: SqliteStorage,
        correlator: IncidentCorrelator,
        reporter: Arc<dyn ReportGenerator>,
        escalator: Arc<dyn Escalator>,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            storage,
            correlator,
            reporter,
            escalator,
            config,
        }
    }

    async fn recent_events(&self, session_id: &str) -> Vec<TelemetryEvent> {
        match self
            .storage
            .get_session_events(session_id, self.config.event_limit)
            .await
        {
            Ok(events) => events,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to fetch events");
                Vec::new()
            }
        }
    }

    /// Analyze a session's friction incident.
    ///
    /// Only a missing session id or a failed final write is an error. An
    /// unresolved incident still yields a report; nothing is persisted then.
    pub async fn analyze(&self, session_id: &str, incident_id: Option<&str>) -> AppResult<AnalysisReport> {
        if session_id.trim().is_empty() {
            return Err(ToolError::Validation {
                field: "session_id".to_string(),
                reason: "must not be empty".to_string(),
            }
            .into());
        }
        info!(session_id = %session_id, incident_id = ?incident_id, "Starting analysis");

        let correlation = self.correlator.correlate(session_id, incident_id).await;
        let events = self.recent_events(session_id).await;

        let repro = (!events.is_empty())
            .then(|| generate_repro_script(&events, &self.config.repro_base_url));

        let trigger: Option<TriggerType> = correlation
            .incident
            .as_ref()
            .map(|i| i.trigger_type)
            .or_else(|| {
                events
                    .iter()
                    .rev()
                    .find_map(|e| e.friction().map(|f| f.trigger_type))
            });
        let root_cause = rank_root_causes(trigger, &events, correlation.external.as_ref());

        let context = ReportContext {
            incident_id: correlation
                .incident_id
                .clone()
                .unwrap_or_else(|| "unknown".to_string()),
            trigger_type: trigger
                .map(|t| t.as_str())
                .unwrap_or(UNKNOWN_TRIGGER)
                .to_string(),
            external: correlation.external.clone(),
            root_cause: root_cause.clone(),
            events: events.clone(),
        };
        let gemini = self.reporter.generate(&context).await;

        if let Some(incident) = &correlation.incident {
            let diagnostics = IncidentDiagnostics {
                external_error_id: correlation.external.as_ref().map(|r| r.error_id.clone()),
                external_issue_id: correlation.external.as_ref().and_then(|r| r.issue_id.clone()),
                repro_script: repro.clone(),
                root_cause_ranking: Some(root_cause.clone()),
                ai_report: gemini.clone(),
            };
            self.storage
                .update_incident_diagnostics(&incident.id, &diagnostics)
                .await?;
            info!(incident_id = %incident.id, "Incident diagnostics saved");

            self.escalator
                .push(&EscalationSummary::Incident {
                    trigger_type: context.trigger_type.clone(),
                    report: gemini.clone(),
                })
                .await;
        }

        info!(
            session_id = %session_id,
            incident_id = ?correlation.incident_id,
            attempts = correlation.attempts,
            events = events.len(),
            candidates = root_cause.len(),
            report = gemini.is_some(),
            "Analysis complete"
        );

        Ok(AnalysisReport {
            success: true,
            incident_id: correlation.incident_id,
            sentry: correlation.external,
            repro,
            root_cause,
            gemini,
        })
    }
}
