//! Incident correlation.
//!
//! The incident row and the external error record are written by independent
//! systems and may arrive in either order. [`IncidentCorrelator`] polls both
//! for a bounded number of attempts and returns whatever it could resolve.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::CorrelatorConfig;
use crate::external::{ErrorLookup, ExternalErrorRecord};
use crate::storage::{Incident, SqliteStorage, Storage};

/// Outcome of a correlation run. Any part may be missing.
#[derive(Debug, Clone, Default)]
pub struct Correlation {
    pub incident_id: Option<String>,
    pub incident: Option<Incident>,
    pub external: Option<ExternalErrorRecord>,
    /// Attempts made, 1..=max_attempts.
    pub attempts: u32,
}

impl Correlation {
    pub fn is_complete(&self) -> bool {
        self.incident_id.is_some() && self.external.is_some()
    }
}

/// Joins a session's incident with its external error record.
#[derive(Clone)]
pub struct IncidentCorrelator {
    storage: SqliteStorage,
    lookup: Arc<dyn ErrorLookup>,
    config: CorrelatorConfig,
}

impl IncidentCorrelator {
    pub fn new(storage: SqliteStorage, lookup: Arc<dyn ErrorLookup>, config: CorrelatorConfig) -> Self {
        Self {
            storage,
            lookup,
            config,
        }
    }

    async fn find_incident(&self, session_id: &str, incident_id: Option<&str>) -> Option<Incident> {
        let result = match incident_id {
            Some(id) => self.storage.get_incident(id).await,
            None => self.storage.get_latest_incident(session_id).await,
        };
        match result {
            Ok(incident) => incident,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Incident lookup failed");
                None
            }
        }
    }

    /// Resolve the incident and external record for `session_id`.
    ///
    /// Never fails: an exhausted budget yields a partial or empty
    /// [`Correlation`]. Blocks for up to `max_attempts - 1` retry delays.
    pub async fn correlate(&self, session_id: &str, incident_id: Option<&str>) -> Correlation {
        let max_attempts = self.config.max_attempts.max(1);
        let delay = Duration::from_millis(self.config.retry_delay_ms);
        let mut result = Correlation {
            incident_id: incident_id.map(str::to_string),
            ..Default::default()
        };

        for attempt in 1..=max_attempts {
            result.attempts = attempt;

            if let Some(incident) = self
                .find_incident(session_id, result.incident_id.as_deref())
                .await
            {
                result.incident_id = Some(incident.id.clone());
                result.incident = Some(incident);
            }

            if result.external.is_none() {
                let known_id = result
                    .incident
                    .as_ref()
                    .and_then(|i| i.external_error_id.clone());
                result.external = self.lookup.resolve(session_id, known_id).await;
            }

            if result.is_complete() {
                break;
            }

            info!(
                session_id = %session_id,
                attempt,
                max_attempts,
                incident_id = ?result.incident_id,
                external_found = result.external.is_some(),
                "Correlation incomplete"
            );
            if attempt < max_attempts {
                tokio::time::sleep(delay).await;
            }
        }

        if result.incident_id.is_none() {
            warn!(session_id = %session_id, attempts = result.attempts, "No incident resolved, continuing with limited context");
        }
        result
    }
}
