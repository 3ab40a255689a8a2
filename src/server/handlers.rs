use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use super::SharedState;
use crate::analysis::generate_repro_script;
use crate::error::{AppError, McpError, McpResult};
use crate::external::SurveyAnswer;
use crate::ingest::CollectRequest;
use crate::storage::{Incident, Storage};

/// Route tool calls to appropriate handlers
pub async fn handle_tool_call(
    state: &SharedState,
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<Value> {
    info!(tool = %tool_name, "Routing tool call");

    match tool_name {
        "friction_collect" => handle_collect(state, arguments).await,
        "friction_analyze" => handle_analyze(state, arguments).await,
        "friction_incident_get" => handle_incident_get(state, arguments).await,
        "friction_repro" => handle_repro(state, arguments).await,
        "friction_survey_answer" => handle_survey_answer(state, arguments).await,
        _ => Err(McpError::UnknownTool {
            tool_name: tool_name.to_string(),
        }),
    }
}

/// Parameters for `friction_analyze`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnalyzeParams {
    pub session_id: String,
    #[serde(default)]
    pub incident_id: Option<String>,
}

/// Parameters for `friction_incident_get`. `incident_id` wins when both are
/// given.
#[derive(Debug, Clone, Deserialize)]
pub struct IncidentGetParams {
    #[serde(default)]
    pub incident_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
}

/// Parameters for `friction_repro`.
#[derive(Debug, Clone, Deserialize)]
pub struct ReproParams {
    pub session_id: String,
    #[serde(default)]
    pub limit: Option<u32>,
}

/// Response of `friction_repro`.
#[derive(Debug, Clone, Serialize)]
pub struct ReproResponse {
    pub session_id: String,
    pub event_count: usize,
    pub script: String,
}

/// Handle friction_collect: ingest a telemetry batch
async fn handle_collect(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let request: CollectRequest = parse_arguments("friction_collect", arguments)?;
    let response = state
        .ingest
        .collect(request)
        .await
        .map_err(|e| tool_error("friction_collect", e))?;
    serde_json::to_value(response).map_err(McpError::Json)
}

/// Handle friction_analyze: run the correlation pipeline
async fn handle_analyze(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: AnalyzeParams = parse_arguments("friction_analyze", arguments)?;
    let report = state
        .analysis
        .analyze(&params.session_id, params.incident_id.as_deref())
        .await
        .map_err(|e| tool_error("friction_analyze", e))?;
    serde_json::to_value(report).map_err(McpError::Json)
}

async fn handle_incident_get(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: IncidentGetParams = parse_arguments("friction_incident_get", arguments)?;

    let found: Option<Incident> = match (&params.incident_id, &params.session_id) {
        (Some(id), _) => state.storage.get_incident(id).await,
        (None, Some(session_id)) => state.storage.get_latest_incident(session_id).await,
        (None, None) => {
            return Err(McpError::InvalidParameters {
                tool_name: "friction_incident_get".to_string(),
                message: "incident_id or session_id is required".to_string(),
            })
        }
    }
    .map_err(|e| McpError::ExecutionFailed {
        message: e.to_string(),
    })?;

    let incident = found.ok_or_else(|| McpError::ExecutionFailed {
        message: "Incident not found".to_string(),
    })?;
    serde_json::to_value(incident).map_err(McpError::Json)
}

async fn handle_repro(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: ReproParams = parse_arguments("friction_repro", arguments)?;
    let limit = params.limit.unwrap_or(state.config.analysis.event_limit);

    let events = state
        .storage
        .get_session_events(&params.session_id, limit)
        .await
        .map_err(|e| McpError::ExecutionFailed {
            message: e.to_string(),
        })?;
    let script = generate_repro_script(&events, &state.config.analysis.repro_base_url);

    serde_json::to_value(ReproResponse {
        session_id: params.session_id,
        event_count: events.len(),
        script,
    })
    .map_err(McpError::Json)
}

/// Parameters for `friction_survey_answer`.
#[derive(Debug, Clone, Deserialize)]
pub struct SurveyAnswerParams {
    #[serde(alias = "questionId")]
    pub question_id: String,
    pub answer: SurveyAnswer,
}

/// Response of `friction_survey_answer`.
#[derive(Debug, Clone, Serialize)]
pub struct SurveyAnswerResponse {
    pub success: bool,
    #[serde(rename = "responseId", skip_serializing_if = "Option::is_none")]
    pub response_id: Option<String>,
}

/// Handle friction_survey_answer: record a yes/no answer with the collector
async fn handle_survey_answer(state: &SharedState, arguments: Option<Value>) -> McpResult<Value> {
    let params: SurveyAnswerParams = parse_arguments("friction_survey_answer", arguments)?;
    if params.question_id.trim().is_empty() {
        return Err(McpError::InvalidParameters {
            tool_name: "friction_survey_answer".to_string(),
            message: "question_id must not be empty".to_string(),
        });
    }

    let survey = state
        .survey
        .as_ref()
        .filter(|s| s.is_configured())
        .ok_or_else(|| McpError::ExecutionFailed {
            message: "Survey collector is not configured".to_string(),
        })?;

    let response_id = survey
        .answer(params.question_id.trim(), params.answer)
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "Survey answer failed");
            McpError::ExecutionFailed {
                message: e.to_string(),
            }
        })?;

    serde_json::to_value(SurveyAnswerResponse {
        success: true,
        response_id,
    })
    .map_err(McpError::Json)
}

// ============================================================================
// Helper functions
// ============================================================================

/// Helper to parse arguments with consistent error handling
fn parse_arguments<T: serde::de::DeserializeOwned>(
    tool_name: &str,
    arguments: Option<Value>,
) -> McpResult<T> {
    match arguments {
        Some(args) => serde_json::from_value(args).map_err(|e| McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: e.to_string(),
        }),
        None => Err(McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: "Missing arguments".to_string(),
        }),
    }
}

/// Client faults become parameter errors; everything else is an execution
/// failure with a generic message.
fn tool_error(tool_name: &str, err: AppError) -> McpError {
    if err.is_client_fault() {
        McpError::InvalidParameters {
            tool_name: tool_name.to_string(),
            message: err.to_string(),
        }
    } else {
        tracing::error!(tool = %tool_name, error = %err, "Tool execution failed");
        McpError::ExecutionFailed {
            message: format!("{} failed", tool_name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::config::{Config, CorrelatorConfig};
    use crate::events::TriggerType;
    use crate::server::AppState;
    use crate::storage::SqliteStorage;

    async fn state() -> SharedState {
        let storage = SqliteStorage::new_in_memory().await.unwrap();
        let config = Config {
            correlator: CorrelatorConfig {
                max_attempts: 1,
                retry_delay_ms: 0,
            },
            ..Default::default()
        };
        Arc::new(AppState::from_config(config, storage).unwrap())
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = handle_tool_call(&state().await, "friction_export", None)
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::UnknownTool { .. }));
    }

    #[tokio::test]
    async fn test_collect_then_get_incident() {
        let state = state().await;
        let result = handle_tool_call(
            &state,
            "friction_collect",
            Some(json!({
                "session_id": "sess-1",
                "page": "/checkout",
                "events": [{
                    "type": "friction_detected",
                    "ts": 1000,
                    "meta": { "trigger_type": "rage_click", "confidence": 0.9 }
                }]
            })),
        )
        .await
        .unwrap();
        assert_eq!(result["shouldPrompt"], true);
        let incident_id = result["incident_id"].as_str().unwrap().to_string();

        let incident = handle_tool_call(
            &state,
            "friction_incident_get",
            Some(json!({ "session_id": "sess-1" })),
        )
        .await
        .unwrap();
        assert_eq!(incident["id"], incident_id.as_str());
        assert_eq!(incident["trigger_type"], TriggerType::RageClick.as_str());
    }

    #[tokio::test]
    async fn test_collect_without_session_is_invalid_params() {
        let err = handle_tool_call(
            &state().await,
            "friction_collect",
            Some(json!({ "events": [{ "type": "click", "ts": 1, "meta": {} }] })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, McpError::InvalidParameters { .. }));
    }

    #[tokio::test]
    async fn test_incident_get_requires_a_key() {
        let err = handle_tool_call(&state().await, "friction_incident_get", Some(json!({})))
            .await
            .unwrap_err();
        assert!(matches!(err, McpError::InvalidParameters { .. }));
    }

    #[tokio::test]
    async fn test_repro_for_unknown_session_is_scaffold() {
        let result = handle_tool_call(
            &state().await,
            "friction_repro",
            Some(json!({ "session_id": "nobody" })),
        )
        .await
        .unwrap();
        assert_eq!(result["event_count"], 0);
        assert!(result["script"].as_str().unwrap().ends_with("});"));
    }

    #[tokio::test]
    async fn test_survey_answer_validates_arguments() {
        let state = state().await;
        for args in [
            json!({ "answer": "yes" }),
            json!({ "question_id": "275389672" }),
            json!({ "question_id": "275389672", "answer": "maybe" }),
            json!({ "question_id": "  ", "answer": "no" }),
        ] {
            let err = handle_tool_call(&state, "friction_survey_answer", Some(args))
                .await
                .unwrap_err();
            assert!(matches!(err, McpError::InvalidParameters { .. }));
        }
    }

    #[tokio::test]
    async fn test_survey_answer_without_credentials_fails() {
        let err = handle_tool_call(
            &state().await,
            "friction_survey_answer",
            Some(json!({ "questionId": "275389672", "answer": "yes" })),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, McpError::ExecutionFailed { .. }));
    }

    #[tokio::test]
    async fn test_analyze_without_data_succeeds() {
        let result = handle_tool_call(
            &state().await,
            "friction_analyze",
            Some(json!({ "session_id": "quiet" })),
        )
        .await
        .unwrap();
        assert_eq!(result["success"], true);
        assert!(result["sentry"].is_null());
        assert_eq!(result["rootCause"][0]["component"], "NetworkLayer");
    }
}
