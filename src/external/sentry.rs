use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    check_status, http_client, send_error, ErrorLookup, ErrorTag, ExternalErrorRecord,
    FrictionReporter,
};
use crate::config::{RequestConfig, SentryConfig};
use crate::error::{ExternalError, ExternalResult};
use crate::events::FrictionEvent;

/// Tag carrying the friction session id on captured events.
pub const SESSION_TAG: &str = "friction_session_id";

const SERVICE: &str = "sentry";

/// Event as returned by the project events endpoint.
#[derive(Debug, Deserialize)]
struct ProjectEvent {
    #[serde(rename = "eventID")]
    event_id: String,
    #[serde(rename = "groupID", default)]
    group_id: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    tags: Vec<ErrorTag>,
}

#[derive(Debug, Deserialize)]
struct ProjectSummary {
    id: String,
    slug: String,
}

#[derive(Debug, Deserialize)]
struct DiscoverResponse {
    #[serde(default)]
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct StoreResponse {
    #[serde(default)]
    id: Option<String>,
}

/// Client for the Sentry web API (lookup) and store endpoint (capture).
#[derive(Clone)]
pub struct SentryClient {
    client: Client,
    config: SentryConfig,
    request_config: RequestConfig,
    project_id: Arc<RwLock<Option<String>>>,
}

impl SentryClient {
    pub fn new(config: &SentryConfig, request_config: RequestConfig) -> ExternalResult<Self> {
        let mut config = config.clone();
        config.api_base = config.api_base.trim_end_matches('/').to_string();
        config.ingest_url = config
            .ingest_url
            .map(|u| u.trim_end_matches('/').to_string());

        Ok(Self {
            client: http_client(&request_config)?,
            config,
            request_config,
            project_id: Arc::new(RwLock::new(None)),
        })
    }

    fn auth_token(&self) -> ExternalResult<&str> {
        self.config
            .auth_token
            .as_deref()
            .ok_or(ExternalError::NotConfigured { service: SERVICE })
    }

    fn org(&self) -> &str {
        self.config.org.as_deref().unwrap_or_default()
    }

    fn project(&self) -> &str {
        self.config.project.as_deref().unwrap_or_default()
    }

    /// Browser-facing link to an event within its issue.
    pub fn permalink(&self, issue_id: &str, event_id: &str) -> String {
        let web = self.config.api_base.trim_end_matches("/api/0");
        format!(
            "{}/organizations/{}/issues/{}/events/{}/",
            web,
            self.org(),
            issue_id,
            event_id
        )
    }

    async fn get(&self, url: &str) -> ExternalResult<reqwest::Response> {
        self.client
            .get(url)
            .bearer_auth(self.auth_token()?)
            .send()
            .await
            .map_err(|e| send_error(e, self.request_config.timeout_ms))
    }

    /// Fetch a single event by id. A 404 resolves to `None`.
    pub async fn fetch_event(&self, event_id: &str) -> ExternalResult<Option<ExternalErrorRecord>> {
        let url = format!(
            "{}/projects/{}/{}/events/{}/",
            self.config.api_base,
            self.org(),
            self.project(),
            event_id
        );
        debug!(event_id = %event_id, "Fetching Sentry event");

        let response = self.get(&url).await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let event: ProjectEvent = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ExternalError::InvalidResponse {
                message: format!("Failed to parse Sentry event: {}", e),
            })?;

        let permalink = event
            .group_id
            .as_deref()
            .map(|issue| self.permalink(issue, &event.event_id));
        Ok(Some(ExternalErrorRecord {
            error_id: event.event_id,
            issue_id: event.group_id,
            title: event.title,
            permalink,
            tags: event.tags,
        }))
    }

    /// Numeric project id for discover queries. Slugs are resolved through
    /// the project listing once; on failure the slug itself is used.
    pub async fn resolve_project_id(&self) -> String {
        let project = self.project().to_string();
        if project.parse::<u64>().is_ok() {
            return project;
        }
        if let Some(id) = self.project_id.read().await.clone() {
            return id;
        }

        let url = format!("{}/projects/", self.config.api_base);
        let listed = match self.get(&url).await {
            Ok(response) => match check_status(response).await {
                Ok(ok) => ok.json::<Vec<ProjectSummary>>().await.ok(),
                Err(e) => {
                    warn!(error = %e, "Failed to list Sentry projects");
                    None
                }
            },
            Err(e) => {
                warn!(error = %e, "Failed to list Sentry projects");
                None
            }
        };

        match listed.and_then(|ps| ps.into_iter().find(|p| p.slug == project)) {
            Some(found) => {
                info!(slug = %project, project_id = %found.id, "Resolved Sentry project");
                *self.project_id.write().await = Some(found.id.clone());
                found.id
            }
            None => {
                warn!(slug = %project, "Sentry project slug not found, using slug");
                project
            }
        }
    }

    /// Most recent event tagged with `session_id`.
    pub async fn search_session(&self, session_id: &str) -> ExternalResult<Option<ExternalErrorRecord>> {
        let project_id = self.resolve_project_id().await;
        let url = format!("{}/organizations/{}/events/", self.config.api_base, self.org());
        let query = format!("tags.{}:{}", SESSION_TAG, session_id);

        let response = self
            .client
            .get(&url)
            .bearer_auth(self.auth_token()?)
            .query(&[
                ("project", project_id.as_str()),
                ("query", query.as_str()),
                ("field", "id"),
                ("field", "title"),
                ("field", "issue.id"),
                ("field", "timestamp"),
                ("sort", "-timestamp"),
                ("limit", "1"),
            ])
            .send()
            .await
            .map_err(|e| send_error(e, self.request_config.timeout_ms))?;

        let found: DiscoverResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ExternalError::InvalidResponse {
                message: format!("Failed to parse Sentry search: {}", e),
            })?;
        debug!(session_id = %session_id, results = found.data.len(), "Sentry search finished");

        let Some(row) = found.data.into_iter().next() else {
            return Ok(None);
        };
        let Some(error_id) = scalar(&row["id"]) else {
            return Ok(None);
        };
        let issue_id = scalar(&row["issue.id"])
            .or_else(|| scalar(&row["issue_id"]))
            .or_else(|| scalar(&row["groupID"]));
        let permalink = issue_id.as_deref().map(|i| self.permalink(i, &error_id));

        Ok(Some(ExternalErrorRecord {
            error_id,
            issue_id,
            title: row["title"].as_str().map(str::to_string),
            permalink,
            tags: Vec::new(),
        }))
    }

    /// Direct fetch by known id first, then session search.
    pub async fn find_related_event(
        &self,
        session_id: &str,
        known_id: Option<&str>,
    ) -> ExternalResult<Option<ExternalErrorRecord>> {
        if !self.config.lookup_enabled() {
            return Ok(None);
        }

        if let Some(id) = known_id {
            match self.fetch_event(id).await {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => warn!(event_id = %id, "Sentry event not found, falling back to search"),
                Err(e) => warn!(event_id = %id, error = %e, "Direct fetch failed, falling back to search"),
            }
        }

        self.search_session(session_id).await
    }

    /// Send a friction event to the store endpoint and return its id.
    pub async fn capture_friction(
        &self,
        event: &FrictionEvent,
        session_id: &str,
    ) -> ExternalResult<String> {
        let (Some(ingest), Some(key), Some(project_id)) = (
            self.config.ingest_url.as_deref(),
            self.config.public_key.as_deref(),
            self.config.project_id.as_deref(),
        ) else {
            return Err(ExternalError::NotConfigured { service: SERVICE });
        };

        let event_id = Uuid::new_v4().simple().to_string();
        let url = format!("{}/api/{}/store/", ingest, project_id);
        let auth = format!(
            "Sentry sentry_version=7, sentry_key={}, sentry_client=friction-lens/{}",
            key,
            env!("CARGO_PKG_VERSION")
        );
        let body = json!({
            "event_id": event_id,
            "timestamp": Utc::now().to_rfc3339(),
            "level": "warning",
            "platform": "other",
            "message": format!("Friction Detected: {}", event.trigger_type),
            "tags": {
                "friction_type": event.trigger_type.as_str(),
                "confidence": event.confidence.to_string(),
                SESSION_TAG: session_id,
            },
            "extra": {
                "selector": event.selector,
                "x": event.x,
                "y": event.y,
            },
        });

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .header("X-Sentry-Auth", auth)
            .json(&body)
            .send()
            .await
            .map_err(|e| send_error(e, self.request_config.timeout_ms))?;
        let stored: StoreResponse = check_status(response)
            .await?
            .json()
            .await
            .unwrap_or(StoreResponse { id: None });

        let id = stored.id.unwrap_or(event_id);
        info!(
            event_id = %id,
            trigger = %event.trigger_type,
            latency_ms = start.elapsed().as_millis(),
            "Friction captured in Sentry"
        );
        Ok(id)
    }
}

/// Discover columns come back as strings or numbers depending on the field.
fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl ErrorLookup for SentryClient {
    async fn resolve(&self, session_id: &str, known_id: Option<String>) -> Option<ExternalErrorRecord> {
        match self.find_related_event(session_id, known_id.as_deref()).await {
            Ok(found) => found,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Sentry lookup failed");
                None
            }
        }
    }
}

#[async_trait]
impl FrictionReporter for SentryClient {
    async fn capture(&self, event: &FrictionEvent, session_id: &str) -> ExternalResult<String> {
        self.capture_friction(event, session_id).await
    }
}
