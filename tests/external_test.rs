//! Integration tests for the report generator and survey escalation clients

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use friction_lens::config::{GeminiConfig, RequestConfig, SurveyConfig};
use friction_lens::external::{
    AiReport, EscalationSummary, Escalator, GeminiClient, ReportContext, ReportGenerator,
    SurveyAnswer, SurveyClient,
};

fn request_config(max_retries: u32) -> RequestConfig {
    RequestConfig {
        timeout_ms: 5000,
        max_retries,
        retry_delay_ms: 10,
    }
}

fn gemini_response(text: &str) -> serde_json::Value {
    json!({
        "candidates": [{
            "content": { "parts": [{ "text": text }] }
        }]
    })
}

fn create_gemini(server: &MockServer, max_retries: u32) -> GeminiClient {
    let config = GeminiConfig {
        api_key: Some("gm-key".to_string()),
        base_url: server.uri(),
        model: "gemini-1.5-flash".to_string(),
    };
    GeminiClient::new(&config, request_config(max_retries)).expect("Failed to create client")
}

fn context() -> ReportContext {
    ReportContext {
        incident_id: "inc-1".to_string(),
        trigger_type: "rage_click".to_string(),
        ..Default::default()
    }
}

#[cfg(test)]
mod gemini_tests {
    use super::*;

    #[tokio::test]
    async fn test_generate_parses_fenced_report() {
        let server = MockServer::start().await;

        let text = "```json\n{\"intent\":\"apply coupon\",\"category\":\"Bug\",\"severity\":\"High\",\"issue_title\":\"Coupon button broken\",\"repro_steps\":[\"open cart\",\"click apply\"],\"suggested_fix\":\"bind handler\",\"confidence\":0.8}\n```";
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-1.5-flash:generateContent"))
            .and(header("x-goog-api-key", "gm-key"))
            .and(body_partial_json(json!({
                "generationConfig": { "responseMimeType": "application/json" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_response(text)))
            .expect(1)
            .mount(&server)
            .await;

        let report = create_gemini(&server, 0)
            .generate(&context())
            .await
            .expect("report expected");

        assert_eq!(report.intent, "apply coupon");
        assert_eq!(report.severity, "High");
        assert_eq!(report.repro_steps.len(), 2);
        assert!((report.confidence - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_prompt_carries_trigger_and_incident() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(gemini_response("{}")))
            .mount(&server)
            .await;

        let report = create_gemini(&server, 0).generate(&context()).await;
        assert_eq!(report, Some(AiReport::default()));

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        let prompt = body["contents"][0]["parts"][0]["text"].as_str().unwrap();
        assert!(prompt.contains("- Trigger: rage_click"));
        assert!(prompt.contains("- Incident ID: inc-1"));
    }

    #[tokio::test]
    async fn test_retries_then_succeeds() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(gemini_response("{\"intent\":\"checkout\"}")),
            )
            .expect(1)
            .mount(&server)
            .await;

        let report = create_gemini(&server, 2).generate(&context()).await.unwrap();
        assert_eq!(report.intent, "checkout");
    }

    #[tokio::test]
    async fn test_exhausted_retries_yield_no_report() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("overloaded"))
            .expect(2)
            .mount(&server)
            .await;

        assert!(create_gemini(&server, 1).generate(&context()).await.is_none());
    }

    #[tokio::test]
    async fn test_non_json_text_yields_no_report() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(gemini_response("I cannot help with that")),
            )
            .mount(&server)
            .await;

        assert!(create_gemini(&server, 0).generate(&context()).await.is_none());
    }

    #[tokio::test]
    async fn test_empty_candidates_yield_no_report() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "candidates": [] })))
            .mount(&server)
            .await;

        assert!(create_gemini(&server, 0).generate(&context()).await.is_none());
    }
}

#[cfg(test)]
mod survey_tests {
    use super::*;

    fn create_survey(server: &MockServer) -> SurveyClient {
        let config = SurveyConfig {
            access_token: Some("sm-token".to_string()),
            collector_id: Some("col-1".to_string()),
            page_id: "page-1".to_string(),
            question_id: "q-1".to_string(),
            api_base: server.uri(),
            escalate_success: false,
        };
        SurveyClient::new(&config, request_config(0)).unwrap()
    }

    #[tokio::test]
    async fn test_push_submits_rendered_summary() {
        let server = MockServer::start().await;

        let summary = EscalationSummary::Incident {
            trigger_type: "dead_click".to_string(),
            report: None,
        };

        Mock::given(method("POST"))
            .and(path("/collectors/col-1/responses"))
            .and(header("Authorization", "Bearer sm-token"))
            .and(body_partial_json(json!({
                "pages": [{
                    "id": "page-1",
                    "questions": [{
                        "id": "q-1",
                        "answers": [{ "text": summary.render() }]
                    }]
                }]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "resp-1" })))
            .expect(1)
            .mount(&server)
            .await;

        create_survey(&server).push(&summary).await;
    }

    #[tokio::test]
    async fn test_answer_targets_given_question() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/collectors/col-1/responses"))
            .and(header("Authorization", "Bearer sm-token"))
            .and(body_partial_json(json!({
                "pages": [{
                    "id": "page-1",
                    "questions": [{
                        "id": "275389675",
                        "answers": [{ "text": "No" }]
                    }]
                }]
            })))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "id": "resp-9" })))
            .expect(1)
            .mount(&server)
            .await;

        let id = create_survey(&server)
            .answer("275389675", SurveyAnswer::No)
            .await
            .unwrap();
        assert_eq!(id.as_deref(), Some("resp-9"));
    }

    #[tokio::test]
    async fn test_answer_rejection_is_an_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad question"))
            .expect(1)
            .mount(&server)
            .await;

        let err = create_survey(&server)
            .answer("q-missing", SurveyAnswer::Yes)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("bad question"));
    }

    #[tokio::test]
    async fn test_push_failure_is_swallowed() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401))
            .expect(2)
            .mount(&server)
            .await;

        let summary = EscalationSummary::Success {
            flow_name: "checkout".to_string(),
            time_to_complete_ms: 900,
            friction_score: 0,
            error_count: 0,
        };
        create_survey(&server).push(&summary).await;
        assert!(create_survey(&server).submit("x").await.is_err());
    }

    #[tokio::test]
    async fn test_unconfigured_push_sends_nothing() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let config = SurveyConfig {
            api_base: server.uri(),
            ..Default::default()
        };
        let client = SurveyClient::new(&config, request_config(0)).unwrap();
        client
            .push(&EscalationSummary::Incident {
                trigger_type: "error_loop".to_string(),
                report: None,
            })
            .await;
    }
}
