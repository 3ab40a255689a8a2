//! Ingestion of telemetry batches.
//!
//! A batch is decoded once, persisted, and scanned for a qualifying friction
//! trigger (creating at most one incident) and for goal completions (creating
//! success signals).

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AppResult, ToolError};
use crate::events::{EventPayload, TelemetryEvent, TriggerType, WireEvent};
use crate::external::{EscalationSummary, Escalator};
use crate::storage::{Incident, SqliteStorage, Storage, SuccessSignal, DEFAULT_FRICTION_SCORE};

/// Incidents are created only above this confidence.
pub const INCIDENT_CONFIDENCE_THRESHOLD: f64 = 0.7;

/// Prompt variant returned with every new incident.
pub const PROMPT_VARIANT: &str = "empathy_first";

/// Points added to a success signal's friction score per friction event.
const FRICTION_POINTS_PER_EVENT: i64 = 20;

/// Assumed flow duration when a goal carries no start time.
const FALLBACK_FLOW_MS: i64 = 30_000;

/// Trigger data a client may send alongside a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default, alias = "trigger_type", skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friction_score: Option<i64>,
    #[serde(
        default,
        alias = "sentry_event_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_error_id: Option<String>,
}

/// A telemetry batch as posted by the tracker.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default)]
    pub events: Vec<WireEvent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_state: Option<ClientState>,
}

/// Result of ingesting a batch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectResponse {
    pub success: bool,
    #[serde(rename = "shouldPrompt", default, skip_serializing_if = "Option::is_none")]
    pub should_prompt: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_variant: Option<String>,
}

/// Where batches go. Implemented by the in-process [`IngestService`] and by
/// the tracker's HTTP client.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestSink: Send + Sync {
    async fn send(&self, request: CollectRequest) -> AppResult<CollectResponse>;
}

/// Trigger extracted from a batch, before the threshold check.
struct Trigger {
    trigger_type: TriggerType,
    confidence: f64,
    friction_score: i64,
    external_error_id: Option<String>,
}

/// Decodes, persists and classifies telemetry batches.
#[derive(Clone)]
pub struct IngestService {
    storage: SqliteStorage,
    success_escalator: Option<Arc<dyn Escalator>>,
}

impl IngestService {
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            storage,
            success_escalator: None,
        }
    }

    /// Push every recorded success signal through `escalator`.
    pub fn with_success_escalator(mut self, escalator: Arc<dyn Escalator>) -> Self {
        self.success_escalator = Some(escalator);
        self
    }

    /// Ingest one batch.
    pub async fn collect(&self, request: CollectRequest) -> AppResult<CollectResponse> {
        let session_id = request
            .session_id
            .clone()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| {
                request
                    .events
                    .iter()
                    .find_map(|e| e.session_id.clone().filter(|s| !s.trim().is_empty()))
            })
            .ok_or_else(|| ToolError::Validation {
                field: "session_id".to_string(),
                reason: "batch has no session id".to_string(),
            })?;

        let total = request.events.len();
        let events: Vec<TelemetryEvent> = request
            .events
            .into_iter()
            .filter_map(|wire| {
                let kind = wire.kind.clone();
                match TelemetryEvent::from_wire(wire, Some(&session_id), request.page.as_deref()) {
                    Ok(event) => Some(event),
                    Err(e) => {
                        warn!(session_id = %session_id, event_type = %kind, error = %e, "Dropping undecodable event");
                        None
                    }
                }
            })
            .collect();

        self.storage.insert_events(&events).await?;
        info!(session_id = %session_id, received = total, stored = events.len(), "Batch ingested");

        let mut response = CollectResponse {
            success: true,
            ..Default::default()
        };

        if let Some(trigger) = Self::find_trigger(&events, request.client_state.as_ref()) {
            if trigger.confidence > INCIDENT_CONFIDENCE_THRESHOLD {
                let page = request
                    .page
                    .clone()
                    .or_else(|| {
                        events
                            .iter()
                            .find(|e| e.friction().is_some())
                            .map(|e| e.page.clone())
                    })
                    .unwrap_or_else(|| "/unknown".to_string());

                let mut incident = Incident::new(&session_id, page, trigger.trigger_type, trigger.confidence)
                    .with_friction_score(trigger.friction_score);
                if let Some(id) = trigger.external_error_id {
                    incident = incident.with_external_error_id(id);
                }
                self.storage.create_incident(&incident).await?;

                response.should_prompt = Some(true);
                response.incident_id = Some(incident.id);
                response.prompt_variant = Some(PROMPT_VARIANT.to_string());
            }
        }

        if let Some(signal) = Self::success_signal(&session_id, &events) {
            info!(
                session_id = %session_id,
                flow = %signal.flow_name,
                time_ms = signal.time_to_complete_ms,
                performance = signal.performance_score,
                "Success signal recorded"
            );
            self.storage.create_success_signal(&signal).await?;

            if let Some(escalator) = &self.success_escalator {
                escalator
                    .push(&EscalationSummary::Success {
                        flow_name: signal.flow_name.clone(),
                        time_to_complete_ms: signal.time_to_complete_ms,
                        friction_score: signal.friction_score,
                        error_count: signal.error_count,
                    })
                    .await;
            }
        }

        Ok(response)
    }

    /// The first friction event of the batch, else the client state.
    fn find_trigger(events: &[TelemetryEvent], client_state: Option<&ClientState>) -> Option<Trigger> {
        let client_score = client_state.and_then(|s| s.friction_score);

        if let Some(friction) = events.iter().find_map(TelemetryEvent::friction) {
            return Some(Trigger {
                trigger_type: friction.trigger_type,
                confidence: friction.confidence,
                friction_score: friction
                    .friction_score
                    .or(client_score)
                    .unwrap_or(DEFAULT_FRICTION_SCORE),
                external_error_id: friction.external_error_id.clone(),
            });
        }

        let state = client_state?;
        let raw = state.trigger.as_deref()?;
        let trigger_type = match raw.parse::<TriggerType>() {
            Ok(t) => t,
            Err(e) => {
                warn!(trigger = %raw, error = %e, "Ignoring client trigger");
                return None;
            }
        };
        Some(Trigger {
            trigger_type,
            confidence: state.confidence.unwrap_or(0.0),
            friction_score: client_score.unwrap_or(DEFAULT_FRICTION_SCORE),
            external_error_id: state.external_error_id.clone(),
        })
    }

    /// Success signal for the first goal completion in the batch.
    fn success_signal(session_id: &str, events: &[TelemetryEvent]) -> Option<SuccessSignal> {
        let (goal_ts, goal) = events.iter().find_map(|e| match &e.payload {
            EventPayload::GoalComplete(meta) => Some((e.ts, meta)),
            _ => None,
        })?;

        let first_ts = events.first().map(|e| e.ts).unwrap_or(goal_ts);
        let started_at = goal.started_at.unwrap_or(first_ts - FALLBACK_FLOW_MS);

        let friction_count = events.iter().filter(|e| e.friction().is_some()).count() as i64;
        let error_count = events
            .iter()
            .filter(|e| matches!(e.payload, EventPayload::ErrorSignal(_)))
            .count() as i64;

        let flow = goal.flow_name.clone().unwrap_or_else(|| "unknown_flow".to_string());
        Some(SuccessSignal::new(session_id, flow).with_metrics(
            goal_ts - started_at,
            friction_count * FRICTION_POINTS_PER_EVENT,
            error_count,
        ))
    }
}

#[async_trait]
impl IngestSink for IngestService {
    async fn send(&self, request: CollectRequest) -> AppResult<CollectResponse> {
        self.collect(request).await
    }
}
