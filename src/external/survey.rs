use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{error, info, warn};

use super::{check_status, http_client, send_error, AiReport, Escalator};
use crate::config::{RequestConfig, SurveyConfig};
use crate::error::{ExternalError, ExternalResult};

/// Human-readable record pushed to the survey collector.
#[derive(Debug, Clone, PartialEq)]
pub enum EscalationSummary {
    Incident {
        trigger_type: String,
        report: Option<AiReport>,
    },
    Success {
        flow_name: String,
        time_to_complete_ms: i64,
        friction_score: i64,
        error_count: i64,
    },
}

impl EscalationSummary {
    pub fn kind(&self) -> &'static str {
        match self {
            EscalationSummary::Incident { .. } => "incident",
            EscalationSummary::Success { .. } => "success_signal",
        }
    }

    /// Single text answer carrying the whole summary.
    pub fn render(&self) -> String {
        match self {
            EscalationSummary::Incident {
                trigger_type,
                report,
            } => {
                let field = |value: Option<&String>, default: &str| {
                    value
                        .filter(|v| !v.is_empty())
                        .cloned()
                        .unwrap_or_else(|| default.to_string())
                };
                let r = report.as_ref();
                format!(
                    "[TRIGGER] {} [INTENT] {} [SEVERITY] {} [CATEGORY] {} [SUMMARY] {} [SUGGESTED FIX] {}",
                    trigger_type,
                    field(r.map(|r| &r.intent), "Unknown"),
                    field(r.map(|r| &r.severity), "Medium"),
                    field(r.map(|r| &r.category), "UX Friction"),
                    field(r.map(|r| &r.issue_title), "Friction Detected"),
                    field(r.map(|r| &r.suggested_fix), "N/A"),
                )
            }
            EscalationSummary::Success {
                flow_name,
                time_to_complete_ms,
                friction_score,
                error_count,
            } => format!(
                "[TYPE] Success Signal\n[FLOW] {}\n[METRICS] Time: {}ms | Friction Score: {}\n[ERRORS] {}",
                flow_name, time_to_complete_ms, friction_score, error_count
            ),
        }
    }
}

/// A closed yes/no answer to a survey question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurveyAnswer {
    Yes,
    No,
}

impl SurveyAnswer {
    /// Text stored as the answer.
    pub fn as_text(&self) -> &'static str {
        match self {
            SurveyAnswer::Yes => "Yes",
            SurveyAnswer::No => "No",
        }
    }
}

/// Pushes escalation summaries as survey responses. Without credentials it
/// logs the payload instead.
#[derive(Clone)]
pub struct SurveyClient {
    client: Client,
    config: SurveyConfig,
    request_config: RequestConfig,
}

impl SurveyClient {
    pub fn new(config: &SurveyConfig, request_config: RequestConfig) -> ExternalResult<Self> {
        let mut config = config.clone();
        config.api_base = config.api_base.trim_end_matches('/').to_string();
        Ok(Self {
            client: http_client(&request_config)?,
            config,
            request_config,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.config.access_token.is_some() && self.config.collector_id.is_some()
    }

    /// Submit `text` as the answer to the configured question.
    pub async fn submit(&self, text: &str) -> ExternalResult<()> {
        self.create_response(&self.config.question_id, text).await?;
        Ok(())
    }

    /// Record a user's answer to `question_id` and return the collector's
    /// response id.
    pub async fn answer(
        &self,
        question_id: &str,
        answer: SurveyAnswer,
    ) -> ExternalResult<Option<String>> {
        info!(question_id = %question_id, answer = answer.as_text(), "Submitting survey answer");
        let id = self.create_response(question_id, answer.as_text()).await?;
        info!(question_id = %question_id, response_id = ?id, "Survey answer recorded");
        Ok(id)
    }

    async fn create_response(&self, question_id: &str, text: &str) -> ExternalResult<Option<String>> {
        let (Some(token), Some(collector)) = (
            self.config.access_token.as_deref(),
            self.config.collector_id.as_deref(),
        ) else {
            return Err(ExternalError::NotConfigured { service: "surveymonkey" });
        };

        let url = format!("{}/collectors/{}/responses", self.config.api_base, collector);
        let response = self
            .client
            .post(&url)
            .bearer_auth(token)
            .json(&json!({
                "pages": [{
                    "id": self.config.page_id,
                    "questions": [{
                        "id": question_id,
                        "answers": [{ "text": text }]
                    }]
                }]
            }))
            .send()
            .await
            .map_err(|e| send_error(e, self.request_config.timeout_ms))?;
        let body: Value = check_status(response)
            .await?
            .json()
            .await
            .unwrap_or(Value::Null);
        Ok(body.get("id").and_then(Value::as_str).map(str::to_string))
    }
}

#[async_trait]
impl Escalator for SurveyClient {
    async fn push(&self, summary: &EscalationSummary) {
        let text = summary.render();
        if !self.is_configured() {
            warn!(kind = summary.kind(), "Skipping escalation push: survey collector not configured");
            info!(kind = summary.kind(), payload = %text, "Escalation dry run");
            return;
        }
        match self.submit(&text).await {
            Ok(()) => info!(kind = summary.kind(), "Escalation pushed"),
            Err(e) => error!(kind = summary.kind(), error = %e, "Escalation push failed"),
        }
    }
}
