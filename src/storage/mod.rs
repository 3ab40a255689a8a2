//! Persistence for telemetry events, friction incidents and success signals.
//!
//! [`SqliteStorage`] is the only implementation; services hold it by value
//! (it wraps a connection pool and clones cheaply).

mod sqlite;


pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::analysis::RootCauseCandidate;
use crate::error::StorageResult;
use crate::events::{TelemetryEvent, TriggerType};
use crate::external::AiReport;

/// Default friction score when the client does not report one.
pub const DEFAULT_FRICTION_SCORE: i64 = 50;

/// A persisted friction moment awaiting (or holding) diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub session_id: String,
    pub page: String,
    pub trigger_type: TriggerType,
    /// Detector confidence (0.0-1.0).
    pub confidence: f64,
    pub friction_score: i64,
    /// Id of the related event in the external error tracker.
    pub external_error_id: Option<String>,
    pub external_issue_id: Option<String>,
    pub repro_script: Option<String>,
    pub root_cause_ranking: Option<Vec<RootCauseCandidate>>,
    pub ai_report: Option<AiReport>,
    pub created_at: DateTime<Utc>,
}

impl Incident {
    /// Create a new incident with no diagnostics attached.
    pub fn new(
        session_id: impl Into<String>,
        page: impl Into<String>,
        trigger_type: TriggerType,
        confidence: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            page: page.into(),
            trigger_type,
            confidence: confidence.clamp(0.0, 1.0),
            friction_score: DEFAULT_FRICTION_SCORE,
            external_error_id: None,
            external_issue_id: None,
            repro_script: None,
            root_cause_ranking: None,
            ai_report: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_friction_score(mut self, score: i64) -> Self {
        self.friction_score = score;
        self
    }

    pub fn with_external_error_id(mut self, id: impl Into<String>) -> Self {
        self.external_error_id = Some(id.into());
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Diagnostics written back onto an incident after analysis.
///
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IncidentDiagnostics {
    pub external_error_id: Option<String>,
    pub external_issue_id: Option<String>,
    pub repro_script: Option<String>,
    pub root_cause_ranking: Option<Vec<RootCauseCandidate>>,
    pub ai_report: Option<AiReport>,
}

/// A completed goal flow with derived performance figures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuccessSignal {
    pub id: String,
    pub session_id: String,
    pub flow_name: String,
    pub time_to_complete_ms: i64,
    pub friction_score: i64,
    pub error_count: i64,
    /// 0-100, higher is smoother.
    pub performance_score: i64,
    pub created_at: DateTime<Utc>,
}

impl SuccessSignal {
    pub fn new(session_id: impl Into<String>, flow_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            flow_name: flow_name.into(),
            time_to_complete_ms: 0,
            friction_score: 0,
            error_count: 0,
            performance_score: 100,
            created_at: Utc::now(),
        }
    }

    /// Set the measured figures and derive the performance score.
    pub fn with_metrics(mut self, time_to_complete_ms: i64, friction_score: i64, error_count: i64) -> Self {
        self.time_to_complete_ms = time_to_complete_ms.max(0);
        self.friction_score = friction_score;
        self.error_count = error_count;
        self.performance_score = (100 - friction_score - error_count * 10).max(0);
        self
    }
}

/// Storage trait for friction data
#[async_trait]
pub trait Storage: Send + Sync {
    // Event operations

    /// Append a batch of decoded events.
    async fn insert_events(&self, events: &[TelemetryEvent]) -> StorageResult<()>;
    /// The `limit` most recent events of a session, oldest first.
    async fn get_session_events(&self, session_id: &str, limit: u32) -> StorageResult<Vec<TelemetryEvent>>;

    // Incident operations

    /// Create a new incident.
    async fn create_incident(&self, incident: &Incident) -> StorageResult<()>;
    /// Get an incident by ID.
    async fn get_incident(&self, id: &str) -> StorageResult<Option<Incident>>;
    /// Most recently created incident of a session.
    async fn get_latest_incident(&self, session_id: &str) -> StorageResult<Option<Incident>>;
    /// Attach analysis results to an incident.
    async fn update_incident_diagnostics(&self, id: &str, diagnostics: &IncidentDiagnostics) -> StorageResult<()>;

    // Success signal operations

    /// Record a completed goal flow.
    async fn create_success_signal(&self, signal: &SuccessSignal) -> StorageResult<()>;
    /// All success signals of a session, oldest first.
    async fn get_session_success_signals(&self, session_id: &str) -> StorageResult<Vec<SuccessSignal>>;
}
