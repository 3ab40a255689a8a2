use serde::{Deserialize, Serialize};

/// Identity of a clicked element as reported by the host page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Host-assigned handle, stable for the element's lifetime.
    pub node: u64,
    #[serde(default)]
    pub tag: String,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default, alias = "testId")]
    pub test_id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    /// Element is disabled or otherwise marked non-interactive.
    #[serde(default)]
    pub disabled: bool,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl ElementInfo {
    /// Create an element descriptor with only a tag name.
    pub fn new(node: u64, tag: impl Into<String>) -> Self {
        Self {
            node,
            tag: tag.into(),
            ..Default::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id = Some(test_id.into());
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    /// Best-effort CSS-ish identity: `#id`, then `[data-testid="..."]`, then
    /// the lowercased tag name. Blank values are skipped; an element with no
    /// usable identity yields an empty string.
    pub fn selector(&self) -> String {
        if let Some(id) = non_blank(&self.id) {
            return format!("#{}", id);
        }
        if let Some(test_id) = non_blank(&self.test_id) {
            return format!("[data-testid=\"{}\"]", test_id);
        }
        self.tag.trim().to_lowercase()
    }

    /// Test identifier, if one is set.
    pub fn test_id(&self) -> Option<&str> {
        non_blank(&self.test_id)
    }

    /// Element id, if one is set.
    pub fn element_id(&self) -> Option<&str> {
        non_blank(&self.id)
    }

    /// Visible text truncated to 50 characters.
    pub fn visible_text(&self) -> Option<String> {
        non_blank(&self.text).map(|t| t.chars().take(50).collect())
    }
}

/// A raw browser signal consumed by the friction detector.
///
/// All timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RawSignal {
    Click {
        ts: i64,
        x: f64,
        y: f64,
        #[serde(default)]
        target: Option<ElementInfo>,
    },
    /// Any observed DOM mutation.
    DomActivity { ts: i64 },
    /// Navigation, including programmatic history mutation.
    Navigation { ts: i64, path: String },
    /// Uncaught error.
    Error { ts: i64, message: String },
    /// Unhandled promise rejection.
    Rejection { ts: i64, message: String },
}

impl RawSignal {
    /// Timestamp of the signal.
    pub fn ts(&self) -> i64 {
        match self {
            RawSignal::Click { ts, .. }
            | RawSignal::DomActivity { ts }
            | RawSignal::Navigation { ts, .. }
            | RawSignal::Error { ts, .. }
            | RawSignal::Rejection { ts, .. } => *ts,
        }
    }

    pub fn click(ts: i64, x: f64, y: f64, target: Option<ElementInfo>) -> Self {
        RawSignal::Click { ts, x, y, target }
    }

    pub fn navigation(ts: i64, path: impl Into<String>) -> Self {
        RawSignal::Navigation {
            ts,
            path: path.into(),
        }
    }

    pub fn error(ts: i64, message: impl Into<String>) -> Self {
        RawSignal::Error {
            ts,
            message: message.into(),
        }
    }

    pub fn rejection(ts: i64, message: impl Into<String>) -> Self {
        RawSignal::Rejection {
            ts,
            message: message.into(),
        }
    }
}
