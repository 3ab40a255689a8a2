//! Event model shared by the client-side detector/tracker and the ingestion
//! pipeline.
//!
//! Telemetry travels over the wire as [`WireEvent`] (`{type, ts, session_id,
//! page, meta}`) and is decoded exactly once into a [`TelemetryEvent`] whose
//! payload is the typed [`EventPayload`] union. Consumers never parse `meta`
//! themselves.

mod friction;
mod signal;

pub use friction::{FrictionEvent, TriggerType};
pub use signal::{ElementInfo, RawSignal};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ToolError;

/// Metadata of an auto-captured click.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClickMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, alias = "testId", skip_serializing_if = "Option::is_none")]
    pub test_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

impl ClickMeta {
    /// Build click metadata from the clicked element and coordinates.
    pub fn from_element(target: Option<&ElementInfo>, x: f64, y: f64) -> Self {
        let mut meta = ClickMeta {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        };
        if let Some(el) = target {
            meta.tag = Some(el.tag.to_lowercase()).filter(|t| !t.is_empty());
            meta.id = el.element_id().map(str::to_string);
            meta.test_id = el.test_id().map(str::to_string);
            meta.text = el.visible_text();
        }
        meta
    }
}

/// Metadata of a scroll.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScrollMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
}

/// Metadata of a navigation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Metadata of an uncaught error or rejection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorMeta {
    #[serde(default)]
    pub message: String,
    /// `"error"` or `"rejection"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// Metadata of a completed goal flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GoalMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flow_name: Option<String>,
    /// Epoch milliseconds when the flow started.
    #[serde(default, alias = "startedAt", skip_serializing_if = "Option::is_none")]
    pub started_at: Option<i64>,
}

/// Metadata of feedback prompt interactions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub incident_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer: Option<String>,
}

/// Typed payload of a telemetry event, one variant per event `type`.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    Click(ClickMeta),
    Scroll(ScrollMeta),
    Nav(NavMeta),
    ErrorSignal(ErrorMeta),
    GoalComplete(GoalMeta),
    FeedbackOpened(FeedbackMeta),
    FeedbackSubmitted(FeedbackMeta),
    FeedbackDismissed(FeedbackMeta),
    FrictionDetected(FrictionEvent),
}

fn decode_meta<T: serde::de::DeserializeOwned>(kind: &str, meta: Value) -> Result<T, ToolError> {
    serde_json::from_value(meta).map_err(|e| ToolError::Decode {
        message: format!("invalid meta for {}: {}", kind, e),
    })
}

impl EventPayload {
    /// The wire `type` of this payload.
    pub fn kind(&self) -> &'static str {
        match self {
            EventPayload::Click(_) => "click",
            EventPayload::Scroll(_) => "scroll",
            EventPayload::Nav(_) => "nav",
            EventPayload::ErrorSignal(_) => "error_signal",
            EventPayload::GoalComplete(_) => "goal_complete",
            EventPayload::FeedbackOpened(_) => "feedback_opened",
            EventPayload::FeedbackSubmitted(_) => "feedback_submitted",
            EventPayload::FeedbackDismissed(_) => "feedback_dismissed",
            EventPayload::FrictionDetected(_) => "friction_detected",
        }
    }

    /// Decode a payload from its wire `type` and `meta` object.
    ///
    /// `meta` may also arrive as a JSON-encoded string; `null` is treated as an
    /// empty object.
    pub fn decode(kind: &str, meta: Value) -> Result<Self, ToolError> {
        let meta = match meta {
            Value::Null => Value::Object(Default::default()),
            Value::String(raw) => serde_json::from_str(&raw).map_err(|e| ToolError::Decode {
                message: format!("meta for {} is not valid JSON: {}", kind, e),
            })?,
            other => other,
        };

        Ok(match kind {
            "click" => EventPayload::Click(decode_meta(kind, meta)?),
            "scroll" => EventPayload::Scroll(decode_meta(kind, meta)?),
            "nav" => EventPayload::Nav(decode_meta(kind, meta)?),
            "error_signal" => EventPayload::ErrorSignal(decode_meta(kind, meta)?),
            "goal_complete" => EventPayload::GoalComplete(decode_meta(kind, meta)?),
            "feedback_opened" => EventPayload::FeedbackOpened(decode_meta(kind, meta)?),
            "feedback_submitted" => EventPayload::FeedbackSubmitted(decode_meta(kind, meta)?),
            "feedback_dismissed" => EventPayload::FeedbackDismissed(decode_meta(kind, meta)?),
            "friction_detected" => EventPayload::FrictionDetected(decode_meta(kind, meta)?),
            other => {
                return Err(ToolError::Decode {
                    message: format!("unknown event type: {}", other),
                })
            }
        })
    }

    /// Encode the payload as a `meta` object.
    pub fn meta(&self) -> Value {
        let encoded = match self {
            EventPayload::Click(m) => serde_json::to_value(m),
            EventPayload::Scroll(m) => serde_json::to_value(m),
            EventPayload::Nav(m) => serde_json::to_value(m),
            EventPayload::ErrorSignal(m) => serde_json::to_value(m),
            EventPayload::GoalComplete(m) => serde_json::to_value(m),
            EventPayload::FeedbackOpened(m)
            | EventPayload::FeedbackSubmitted(m)
            | EventPayload::FeedbackDismissed(m) => serde_json::to_value(m),
            EventPayload::FrictionDetected(m) => serde_json::to_value(m),
        };
        // Plain structs of strings and numbers always encode.
        encoded.unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

/// The unit the tracker buffers and ships, decoded once at ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryEvent {
    /// Epoch milliseconds.
    pub ts: i64,
    pub session_id: String,
    pub page: String,
    /// Experiment variant of the session, if known.
    pub variant: Option<String>,
    pub payload: EventPayload,
}

/// Wire shape of a telemetry event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    #[serde(rename = "type")]
    pub kind: String,
    pub ts: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<String>,
    #[serde(default)]
    pub meta: Value,
}

impl TelemetryEvent {
    /// Create a new telemetry event
    pub fn new(
        ts: i64,
        session_id: impl Into<String>,
        page: impl Into<String>,
        payload: EventPayload,
    ) -> Self {
        Self {
            ts,
            session_id: session_id.into(),
            page: page.into(),
            variant: None,
            payload,
        }
    }

    pub fn with_variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    /// The wire `type` of this event.
    pub fn kind(&self) -> &'static str {
        self.payload.kind()
    }

    /// Friction payload, if this is a `friction_detected` event.
    pub fn friction(&self) -> Option<&FrictionEvent> {
        match &self.payload {
            EventPayload::FrictionDetected(f) => Some(f),
            _ => None,
        }
    }

    /// Decode a wire event. Session and page fall back to the batch-level
    /// values; a missing session id is a client fault.
    pub fn from_wire(
        wire: WireEvent,
        batch_session: Option<&str>,
        batch_page: Option<&str>,
    ) -> Result<Self, ToolError> {
        let session_id = batch_session
            .map(str::to_string)
            .or(wire.session_id)
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| ToolError::Validation {
                field: "session_id".to_string(),
                reason: "event has no session id".to_string(),
            })?;
        let page = batch_page
            .map(str::to_string)
            .or(wire.page)
            .unwrap_or_else(|| "/unknown".to_string());

        let mut meta = wire.meta;
        let variant = match &mut meta {
            Value::Object(map) => map
                .remove("variant")
                .and_then(|v| v.as_str().map(str::to_string)),
            _ => None,
        };

        Ok(Self {
            ts: wire.ts,
            session_id,
            page,
            variant,
            payload: EventPayload::decode(&wire.kind, meta)?,
        })
    }

    /// Encode as a wire event, folding the variant into `meta`.
    pub fn to_wire(&self) -> WireEvent {
        let mut meta = self.payload.meta();
        if let (Some(variant), Value::Object(map)) = (&self.variant, &mut meta) {
            map.insert("variant".to_string(), Value::String(variant.clone()));
        }
        WireEvent {
            kind: self.kind().to_string(),
            ts: self.ts,
            session_id: Some(self.session_id.clone()),
            page: Some(self.page.clone()),
            meta,
        }
    }
}
