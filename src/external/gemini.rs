use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, warn};

use super::{check_status, http_client, send_error, ExternalErrorRecord, ReportGenerator};
use crate::analysis::RootCauseCandidate;
use crate::config::{GeminiConfig, RequestConfig};
use crate::error::{ExternalError, ExternalResult};
use crate::events::{EventPayload, TelemetryEvent};
use crate::prompts::{INCIDENT_REPORT_PROMPT, NO_EXTERNAL_ERROR, NO_ROOT_CAUSE};

const SERVICE: &str = "gemini";

/// Number of trailing events included in the prompt.
pub const PROMPT_EVENT_LIMIT: usize = 20;

/// Structured incident report. Missing fields decode to defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AiReport {
    #[serde(default)]
    pub intent: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub severity: String,
    #[serde(default)]
    pub issue_title: String,
    #[serde(default)]
    pub repro_steps: Vec<String>,
    #[serde(default)]
    pub suggested_fix: String,
    #[serde(default)]
    pub confidence: f64,
}

/// Everything the report prompt is built from.
#[derive(Debug, Clone, Default)]
pub struct ReportContext {
    pub incident_id: String,
    pub trigger_type: String,
    pub external: Option<ExternalErrorRecord>,
    pub root_cause: Vec<RootCauseCandidate>,
    pub events: Vec<TelemetryEvent>,
}

/// One line per event: `- [time] type on target (id: x)`.
fn summarize_event(event: &TelemetryEvent) -> String {
    let time = DateTime::from_timestamp_millis(event.ts)
        .map(|t| t.format("%H:%M:%S%.3fZ").to_string())
        .unwrap_or_else(|| event.ts.to_string());

    let (target, test_id) = match &event.payload {
        EventPayload::Click(meta) => (meta.tag.clone(), meta.test_id.clone()),
        _ => (None, None),
    };
    let mut line = format!(
        "- [{}] {} on {}",
        time,
        event.kind(),
        target.as_deref().unwrap_or("page")
    );
    if let Some(id) = test_id {
        line.push_str(&format!(" (id: {})", id));
    }
    line
}

/// Render the full prompt for `context`.
pub fn build_prompt(context: &ReportContext) -> String {
    let external = context
        .external
        .as_ref()
        .and_then(|e| serde_json::to_string_pretty(e).ok())
        .unwrap_or_else(|| NO_EXTERNAL_ERROR.to_string());
    let root_cause = if context.root_cause.is_empty() {
        NO_ROOT_CAUSE.to_string()
    } else {
        serde_json::to_string_pretty(&context.root_cause).unwrap_or_else(|_| NO_ROOT_CAUSE.to_string())
    };

    let skip = context.events.len().saturating_sub(PROMPT_EVENT_LIMIT);
    let actions = context.events[skip..]
        .iter()
        .map(summarize_event)
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "{}\n\nCONTEXT:\n- Trigger: {}\n- Incident ID: {}\n\nEXTERNAL ERROR:\n{}\n\nROOT CAUSE HINTS:\n{}\n\nUSER ACTION LOG (last {} events):\n{}\n",
        INCIDENT_REPORT_PROMPT,
        context.trigger_type,
        context.incident_id,
        external,
        root_cause,
        PROMPT_EVENT_LIMIT,
        actions
    )
}

/// Remove markdown code fences the model sometimes adds anyway.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    trimmed.strip_suffix("```").unwrap_or(trimmed).trim()
}

/// Parse the model's text into a report. Empty or invalid JSON yields `None`.
pub fn parse_report(text: &str) -> Option<AiReport> {
    let cleaned = strip_code_fences(text);
    if cleaned.is_empty() {
        error!("Empty report response received");
        return None;
    }
    match serde_json::from_str::<AiReport>(cleaned) {
        Ok(mut report) => {
            report.confidence = report.confidence.clamp(0.0, 1.0);
            Some(report)
        }
        Err(e) => {
            error!(error = %e, "Report JSON parse failed");
            None
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    #[serde(default)]
    text: Option<String>,
}

/// Client for the Gemini `generateContent` API.
#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    request_config: RequestConfig,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig, request_config: RequestConfig) -> ExternalResult<Self> {
        Ok(Self {
            client: http_client(&request_config)?,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            request_config,
        })
    }

    pub fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    /// Run `prompt` through the model with retries, returning the text.
    pub async fn generate_content(&self, prompt: &str) -> ExternalResult<String> {
        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        );

        let mut last_error = None;
        let mut retries = 0;

        while retries <= self.request_config.max_retries {
            if retries > 0 {
                let delay = Duration::from_millis(
                    self.request_config.retry_delay_ms * (2_u64.pow(retries - 1)),
                );
                warn!(
                    model = %self.model,
                    retry = retries,
                    delay_ms = delay.as_millis(),
                    "Retrying Gemini request"
                );
                tokio::time::sleep(delay).await;
            }

            let start = Instant::now();
            match self.execute_request(&url, prompt).await {
                Ok(text) => {
                    info!(
                        model = %self.model,
                        latency_ms = start.elapsed().as_millis(),
                        "Gemini call succeeded"
                    );
                    return Ok(text);
                }
                Err(e) => {
                    error!(
                        model = %self.model,
                        error = %e,
                        latency_ms = start.elapsed().as_millis(),
                        retry = retries,
                        "Gemini call failed"
                    );
                    last_error = Some(e);
                    retries += 1;
                }
            }
        }

        Err(ExternalError::Unavailable {
            service: SERVICE,
            message: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "Unknown error".to_string()),
            retries,
        })
    }

    async fn execute_request(&self, url: &str, prompt: &str) -> ExternalResult<String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or(ExternalError::NotConfigured { service: SERVICE })?;

        debug!(model = %self.model, prompt_len = prompt.len(), "Calling Gemini");

        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", api_key)
            .json(&json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
                "generationConfig": { "responseMimeType": "application/json" }
            }))
            .send()
            .await
            .map_err(|e| send_error(e, self.request_config.timeout_ms))?;

        let body: GenerateResponse = check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ExternalError::InvalidResponse {
                message: format!("Failed to parse response: {}", e),
            })?;

        Ok(body
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| {
                c.parts
                    .into_iter()
                    .filter_map(|p| p.text)
                    .collect::<String>()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl ReportGenerator for GeminiClient {
    async fn generate(&self, context: &ReportContext) -> Option<AiReport> {
        if !self.is_configured() {
            warn!("Skipping report: GEMINI_API_KEY not set");
            return None;
        }
        let prompt = build_prompt(context);
        match self.generate_content(&prompt).await {
            Ok(text) => parse_report(&text),
            Err(e) => {
                error!(incident_id = %context.incident_id, error = %e, "Report generation failed");
                None
            }
        }
    }
}
