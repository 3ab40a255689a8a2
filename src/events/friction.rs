use serde::{Deserialize, Serialize};

/// Kind of friction pattern that fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Rapid repeated clicks on one spot.
    RageClick,
    /// A click that produced no observable response.
    DeadClick,
    /// Repeated similar uncaught errors.
    ErrorLoop,
    /// Oscillating navigation between two pages.
    BacktrackLoop,
}

impl TriggerType {
    /// Convert to the wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerType::RageClick => "rage_click",
            TriggerType::DeadClick => "dead_click",
            TriggerType::ErrorLoop => "error_loop",
            TriggerType::BacktrackLoop => "backtrack_loop",
        }
    }
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for TriggerType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "rage_click" => Ok(TriggerType::RageClick),
            "dead_click" => Ok(TriggerType::DeadClick),
            "error_loop" => Ok(TriggerType::ErrorLoop),
            "backtrack_loop" => Ok(TriggerType::BacktrackLoop),
            _ => Err(format!("Unknown trigger type: {}", s)),
        }
    }
}

/// A detected friction moment. Immutable once a detector produced it; the
/// dispatcher only fills in `external_error_id` before delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrictionEvent {
    pub trigger_type: TriggerType,
    /// Detector confidence (0.0-1.0).
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f64>,
    /// Reference into the external error tracker, when capture succeeded.
    #[serde(
        default,
        alias = "sentry_event_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub external_error_id: Option<String>,
    /// Client-computed severity, carried into the incident when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friction_score: Option<i64>,
}

impl FrictionEvent {
    /// Create a new friction event
    pub fn new(trigger_type: TriggerType, confidence: f64) -> Self {
        Self {
            trigger_type,
            confidence: confidence.clamp(0.0, 1.0),
            selector: None,
            x: None,
            y: None,
            external_error_id: None,
            friction_score: None,
        }
    }

    /// Attach a selector. Empty selectors are dropped.
    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        let selector = selector.into();
        self.selector = (!selector.is_empty()).then_some(selector);
        self
    }

    /// Attach click coordinates.
    pub fn with_position(mut self, x: f64, y: f64) -> Self {
        self.x = Some(x);
        self.y = Some(y);
        self
    }

    /// Attach the external error tracker reference.
    pub fn with_external_error_id(mut self, id: impl Into<String>) -> Self {
        self.external_error_id = Some(id.into());
        self
    }

    pub fn with_friction_score(mut self, score: i64) -> Self {
        self.friction_score = Some(score);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_type_round_trip() {
        for t in [
            TriggerType::RageClick,
            TriggerType::DeadClick,
            TriggerType::ErrorLoop,
            TriggerType::BacktrackLoop,
        ] {
            assert_eq!(t.as_str().parse::<TriggerType>().unwrap(), t);
        }
        assert!("friction".parse::<TriggerType>().is_err());
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(FrictionEvent::new(TriggerType::RageClick, 1.7).confidence, 1.0);
        assert_eq!(FrictionEvent::new(TriggerType::RageClick, -0.2).confidence, 0.0);
    }

    #[test]
    fn test_empty_selector_dropped() {
        let event = FrictionEvent::new(TriggerType::DeadClick, 0.75).with_selector("");
        assert!(event.selector.is_none());
    }

    #[test]
    fn test_legacy_external_id_alias() {
        let event: FrictionEvent = serde_json::from_value(serde_json::json!({
            "trigger_type": "rage_click",
            "confidence": 0.9,
            "sentry_event_id": "abc123"
        }))
        .unwrap();
        assert_eq!(event.external_error_id.as_deref(), Some("abc123"));
        assert!(event.friction_score.is_none());
    }

    #[test]
    fn test_friction_score_decoded() {
        let event: FrictionEvent = serde_json::from_value(serde_json::json!({
            "trigger_type": "dead_click",
            "confidence": 0.8,
            "friction_score": 65
        }))
        .unwrap();
        assert_eq!(event.friction_score, Some(65));
    }
}
