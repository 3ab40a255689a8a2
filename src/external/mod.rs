//! Clients for the third-party services the pipeline talks to, and the
//! traits the rest of the crate consumes them through.
//!
//! - [`sentry::SentryClient`]: error tracker lookup and friction capture
//! - [`gemini::GeminiClient`]: generative incident report
//! - [`survey::SurveyClient`]: escalation push and user answers into a
//!   survey collector
//!
//! Every collaborator is optional. Missing credentials turn the client into a
//! no-op rather than failing startup.

pub mod gemini;
pub mod sentry;
pub mod survey;

pub use gemini::{AiReport, GeminiClient, ReportContext};
pub use sentry::SentryClient;
pub use survey::{EscalationSummary, SurveyAnswer, SurveyClient};

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::RequestConfig;
use crate::error::{ExternalError, ExternalResult};
use crate::events::FrictionEvent;

/// A `key=value` tag attached to an external error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorTag {
    pub key: String,
    pub value: String,
}

/// An error record held by the external error tracker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalErrorRecord {
    pub error_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issue_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permalink: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<ErrorTag>,
}

impl ExternalErrorRecord {
    pub fn new(error_id: impl Into<String>) -> Self {
        Self {
            error_id: error_id.into(),
            issue_id: None,
            title: None,
            permalink: None,
            tags: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_issue_id(mut self, issue_id: impl Into<String>) -> Self {
        self.issue_id = Some(issue_id.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push(ErrorTag {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    /// Value of the first tag named `key`.
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }
}

/// Finds the external error related to a session.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ErrorLookup: Send + Sync {
    /// Resolve the error for `session_id`, preferring `known_id` when the
    /// incident already references one. Failures resolve to `None`.
    async fn resolve(&self, session_id: &str, known_id: Option<String>)
        -> Option<ExternalErrorRecord>;
}

/// Records a detected friction event with the external error tracker.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FrictionReporter: Send + Sync {
    /// Capture `event` and return the tracker's id for it.
    async fn capture(&self, event: &FrictionEvent, session_id: &str) -> ExternalResult<String>;
}

/// Produces a structured incident report from analysis context.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, context: &ReportContext) -> Option<AiReport>;
}

/// Best-effort one-way push of a human-readable summary.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Escalator: Send + Sync {
    async fn push(&self, summary: &EscalationSummary);
}

/// Lookup that never finds anything, used when the tracker is unconfigured.
pub struct NoLookup;

#[async_trait]
impl ErrorLookup for NoLookup {
    async fn resolve(&self, _: &str, _: Option<String>) -> Option<ExternalErrorRecord> {
        None
    }
}

/// Build the shared HTTP client with the configured timeout.
pub(crate) fn http_client(request: &RequestConfig) -> ExternalResult<Client> {
    Client::builder()
        .timeout(Duration::from_millis(request.timeout_ms))
        .build()
        .map_err(ExternalError::Http)
}

/// Map a reqwest send failure, distinguishing timeouts.
pub(crate) fn send_error(e: reqwest::Error, timeout_ms: u64) -> ExternalError {
    if e.is_timeout() {
        ExternalError::Timeout { timeout_ms }
    } else {
        ExternalError::Http(e)
    }
}

/// Turn a non-success response into [`ExternalError::Api`].
pub(crate) async fn check_status(response: reqwest::Response) -> ExternalResult<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ExternalError::Api {
        status: status.as_u16(),
        message: body,
    })
}
