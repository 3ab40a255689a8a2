use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::AppError;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub request: RequestConfig,
    pub sentry: SentryConfig,
    pub gemini: GeminiConfig,
    pub survey: SurveyConfig,
    pub correlator: CorrelatorConfig,
    pub analysis: AnalysisConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    pub max_connections: u32,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// Log output format
#[derive(Debug, Clone, PartialEq)]
pub enum LogFormat {
    Pretty,
    Json,
}

/// HTTP request configuration shared by every external client
#[derive(Debug, Clone)]
pub struct RequestConfig {
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

/// Error tracker (Sentry) configuration.
///
/// Lookup needs `auth_token`, `org` and `project`; capture needs
/// `ingest_url`, `public_key` and `project_id`. Missing values disable the
/// respective half without failing startup.
#[derive(Debug, Clone)]
pub struct SentryConfig {
    pub auth_token: Option<String>,
    pub org: Option<String>,
    pub project: Option<String>,
    pub api_base: String,
    pub ingest_url: Option<String>,
    pub public_key: Option<String>,
    pub project_id: Option<String>,
}

/// Generative report (Gemini) configuration
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
}

/// Survey collector configuration used for escalation pushes
#[derive(Debug, Clone)]
pub struct SurveyConfig {
    pub access_token: Option<String>,
    pub collector_id: Option<String>,
    pub page_id: String,
    pub question_id: String,
    pub api_base: String,
    /// Also push goal completions, not only analyzed incidents.
    pub escalate_success: bool,
}

/// Incident correlator retry budget
#[derive(Debug, Clone)]
pub struct CorrelatorConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

/// Analysis pipeline settings
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Number of most recent session events fed to ranking and repro.
    pub event_limit: u32,
    /// Origin prefixed to navigation steps in repro scripts.
    pub repro_base_url: String,
}

/// Friction detector tuning
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
    pub rage_window_ms: i64,
    pub rage_radius_px: f64,
    pub rage_threshold: usize,
    pub dead_click_delay_ms: i64,
    pub error_window_ms: i64,
    pub error_threshold: usize,
    pub backtrack_window_ms: i64,
    /// Upper bound on waiting for the error tracker to become ready.
    pub reporter_ready_timeout_ms: u64,
}

/// Client-side event tracker settings
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub max_batch: usize,
    pub flush_interval_ms: u64,
    /// Ingestion endpoint used by the HTTP sink.
    pub endpoint: Option<String>,
}

/// Read an optional env var, treating empty strings as unset.
fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Parse an env var into `T`, falling back to `default` when unset.
fn parsed<T: FromStr>(key: &str, default: T) -> Result<T, AppError> {
    match optional(key) {
        Some(raw) => raw.trim().parse().map_err(|_| AppError::Config {
            message: format!("{} has an invalid value: {}", key, raw),
        }),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, AppError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let database = DatabaseConfig {
            path: PathBuf::from(
                optional("DATABASE_PATH").unwrap_or_else(|| "./data/friction.db".to_string()),
            ),
            max_connections: parsed("DATABASE_MAX_CONNECTIONS", 5)?,
        };

        let logging = LoggingConfig {
            level: optional("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            format: match optional("LOG_FORMAT")
                .unwrap_or_else(|| "pretty".to_string())
                .to_lowercase()
                .as_str()
            {
                "json" => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        };

        let request_defaults = RequestConfig::default();
        let request = RequestConfig {
            timeout_ms: parsed("REQUEST_TIMEOUT_MS", request_defaults.timeout_ms)?,
            max_retries: parsed("MAX_RETRIES", request_defaults.max_retries)?,
            retry_delay_ms: parsed("RETRY_DELAY_MS", request_defaults.retry_delay_ms)?,
        };

        let sentry_defaults = SentryConfig::default();
        let sentry = SentryConfig {
            auth_token: optional("SENTRY_AUTH_TOKEN"),
            org: optional("SENTRY_ORG"),
            project: optional("SENTRY_PROJECT"),
            api_base: optional("SENTRY_API_BASE").unwrap_or(sentry_defaults.api_base),
            ingest_url: optional("SENTRY_INGEST_URL"),
            public_key: optional("SENTRY_PUBLIC_KEY"),
            project_id: optional("SENTRY_PROJECT_ID"),
        };

        let gemini_defaults = GeminiConfig::default();
        let gemini = GeminiConfig {
            api_key: optional("GEMINI_API_KEY"),
            base_url: optional("GEMINI_BASE_URL").unwrap_or(gemini_defaults.base_url),
            model: optional("GEMINI_MODEL").unwrap_or(gemini_defaults.model),
        };

        let survey_defaults = SurveyConfig::default();
        let survey = SurveyConfig {
            access_token: optional("SURVEYMONKEY_ACCESS_TOKEN"),
            collector_id: optional("SURVEYMONKEY_COLLECTOR_ID"),
            page_id: optional("SURVEYMONKEY_PAGE_ID").unwrap_or(survey_defaults.page_id),
            question_id: optional("SURVEYMONKEY_QUESTION_ID")
                .unwrap_or(survey_defaults.question_id),
            api_base: optional("SURVEYMONKEY_API_BASE").unwrap_or(survey_defaults.api_base),
            escalate_success: parsed("SURVEY_ESCALATE_SUCCESS", survey_defaults.escalate_success)?,
        };

        let correlator_defaults = CorrelatorConfig::default();
        let correlator = CorrelatorConfig {
            max_attempts: parsed("CORRELATOR_MAX_ATTEMPTS", correlator_defaults.max_attempts)?,
            retry_delay_ms: parsed(
                "CORRELATOR_RETRY_DELAY_MS",
                correlator_defaults.retry_delay_ms,
            )?,
        };

        let analysis_defaults = AnalysisConfig::default();
        let analysis = AnalysisConfig {
            event_limit: parsed("ANALYSIS_EVENT_LIMIT", analysis_defaults.event_limit)?,
            repro_base_url: optional("REPRO_BASE_URL").unwrap_or(analysis_defaults.repro_base_url),
        };

        let d = DetectorConfig::default();
        let detector = DetectorConfig {
            rage_window_ms: parsed("RAGE_WINDOW_MS", d.rage_window_ms)?,
            rage_radius_px: parsed("RAGE_RADIUS_PX", d.rage_radius_px)?,
            rage_threshold: parsed("RAGE_THRESHOLD", d.rage_threshold)?,
            dead_click_delay_ms: parsed("DEAD_CLICK_DELAY_MS", d.dead_click_delay_ms)?,
            error_window_ms: parsed("ERROR_LOOP_WINDOW_MS", d.error_window_ms)?,
            error_threshold: parsed("ERROR_LOOP_THRESHOLD", d.error_threshold)?,
            backtrack_window_ms: parsed("BACKTRACK_WINDOW_MS", d.backtrack_window_ms)?,
            reporter_ready_timeout_ms: parsed(
                "REPORTER_READY_TIMEOUT_MS",
                d.reporter_ready_timeout_ms,
            )?,
        };

        let tracker_defaults = TrackerConfig::default();
        let tracker = TrackerConfig {
            max_batch: parsed("TRACKER_MAX_BATCH", tracker_defaults.max_batch)?,
            flush_interval_ms: parsed(
                "TRACKER_FLUSH_INTERVAL_MS",
                tracker_defaults.flush_interval_ms,
            )?,
            endpoint: optional("TRACKER_ENDPOINT"),
        };

        Ok(Config {
            database,
            logging,
            request,
            sentry,
            gemini,
            survey,
            correlator,
            analysis,
            detector,
            tracker,
        })
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/friction.db"),
            max_connections: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30000,
            max_retries: 2,
            retry_delay_ms: 500,
        }
    }
}

impl Default for SentryConfig {
    fn default() -> Self {
        Self {
            auth_token: None,
            org: None,
            project: None,
            api_base: "https://sentry.io/api/0".to_string(),
            ingest_url: None,
            public_key: None,
            project_id: None,
        }
    }
}

impl SentryConfig {
    /// Whether event lookup credentials are complete.
    pub fn lookup_enabled(&self) -> bool {
        self.auth_token.is_some() && self.org.is_some() && self.project.is_some()
    }

    /// Whether capture (store endpoint) credentials are complete.
    pub fn capture_enabled(&self) -> bool {
        self.ingest_url.is_some() && self.public_key.is_some() && self.project_id.is_some()
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-1.5-flash".to_string(),
        }
    }
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            collector_id: None,
            page_id: "72826105".to_string(),
            question_id: "275387771".to_string(),
            api_base: "https://api.surveymonkey.com/v3".to_string(),
            escalate_success: false,
        }
    }
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            retry_delay_ms: 4000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            event_limit: 50,
            repro_base_url: "http://localhost:3000".to_string(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            rage_window_ms: 2000,
            rage_radius_px: 20.0,
            rage_threshold: 5,
            dead_click_delay_ms: 3000,
            error_window_ms: 30000,
            error_threshold: 3,
            backtrack_window_ms: 120000,
            reporter_ready_timeout_ms: 2000,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            max_batch: 20,
            flush_interval_ms: 2000,
            endpoint: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detector_defaults() {
        let d = DetectorConfig::default();
        assert_eq!(d.rage_window_ms, 2000);
        assert_eq!(d.rage_threshold, 5);
        assert_eq!(d.dead_click_delay_ms, 3000);
        assert_eq!(d.error_window_ms, 30000);
        assert_eq!(d.error_threshold, 3);
        assert_eq!(d.backtrack_window_ms, 120000);
    }

    #[test]
    fn test_correlator_defaults() {
        let c = CorrelatorConfig::default();
        assert_eq!(c.max_attempts, 10);
        assert_eq!(c.retry_delay_ms, 4000);
    }

    #[test]
    fn test_sentry_enablement() {
        let mut cfg = SentryConfig::default();
        assert!(!cfg.lookup_enabled());
        assert!(!cfg.capture_enabled());

        cfg.auth_token = Some("t".into());
        cfg.org = Some("o".into());
        cfg.project = Some("p".into());
        assert!(cfg.lookup_enabled());

        cfg.ingest_url = Some("https://o1.ingest.sentry.io".into());
        cfg.public_key = Some("k".into());
        cfg.project_id = Some("42".into());
        assert!(cfg.capture_enabled());
    }

    #[test]
    fn test_config_default_matches_env_defaults() {
        let c = Config::default();
        assert_eq!(c.database.path, PathBuf::from("./data/friction.db"));
        assert_eq!(c.logging.format, LogFormat::Pretty);
        assert_eq!(c.analysis.event_limit, 50);
    }

    #[test]
    fn test_tracker_defaults() {
        let t = TrackerConfig::default();
        assert_eq!(t.max_batch, 20);
        assert_eq!(t.flush_interval_ms, 2000);
        assert!(t.endpoint.is_none());
    }
}
