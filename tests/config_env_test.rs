//! Config environment variable tests
//!
//! These tests verify that Config::from_env() reads and applies environment
//! variable overrides. Config::from_env() also loads a .env file via dotenvy,
//! so each test sets the variables it asserts on and removes them afterwards.
//!
//! Tests use #[serial] to prevent race conditions with shared env vars.

use std::env;
use std::path::PathBuf;

use friction_lens::config::{Config, LogFormat};
use serial_test::serial;

/// Run `f` with `vars` set, removing them afterwards.
fn with_vars<F: FnOnce()>(vars: &[(&str, &str)], f: F) {
    for (key, value) in vars {
        env::set_var(key, value);
    }
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(f));
    for (key, _) in vars {
        env::remove_var(key);
    }
    if let Err(panic) = outcome {
        std::panic::resume_unwind(panic);
    }
}

#[test]
#[serial]
fn test_config_loads_without_credentials() {
    let config = Config::from_env().expect("no variable is mandatory");
    assert!(config.correlator.max_attempts >= 1);
}

#[test]
#[serial]
fn test_custom_database() {
    with_vars(
        &[
            ("DATABASE_PATH", "/custom/friction.db"),
            ("DATABASE_MAX_CONNECTIONS", "10"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.database.path, PathBuf::from("/custom/friction.db"));
            assert_eq!(config.database.max_connections, 10);
        },
    );
}

#[test]
#[serial]
fn test_json_log_format() {
    with_vars(&[("LOG_FORMAT", "JSON"), ("LOG_LEVEL", "debug")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "debug");
    });
}

#[test]
#[serial]
fn test_unknown_log_format_falls_back_to_pretty() {
    with_vars(&[("LOG_FORMAT", "xml")], || {
        let config = Config::from_env().unwrap();
        assert_eq!(config.logging.format, LogFormat::Pretty);
    });
}

#[test]
#[serial]
fn test_correlator_and_analysis_overrides() {
    with_vars(
        &[
            ("CORRELATOR_MAX_ATTEMPTS", "3"),
            ("CORRELATOR_RETRY_DELAY_MS", "250"),
            ("ANALYSIS_EVENT_LIMIT", "20"),
            ("REPRO_BASE_URL", "https://shop.example.com"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.correlator.max_attempts, 3);
            assert_eq!(config.correlator.retry_delay_ms, 250);
            assert_eq!(config.analysis.event_limit, 20);
            assert_eq!(config.analysis.repro_base_url, "https://shop.example.com");
        },
    );
}

#[test]
#[serial]
fn test_detector_overrides() {
    with_vars(
        &[
            ("RAGE_THRESHOLD", "3"),
            ("RAGE_RADIUS_PX", "35.5"),
            ("DEAD_CLICK_DELAY_MS", "1500"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert_eq!(config.detector.rage_threshold, 3);
            assert_eq!(config.detector.rage_radius_px, 35.5);
            assert_eq!(config.detector.dead_click_delay_ms, 1500);
            assert_eq!(config.detector.error_threshold, 3);
        },
    );
}

#[test]
#[serial]
fn test_invalid_number_is_config_error() {
    with_vars(&[("CORRELATOR_MAX_ATTEMPTS", "lots")], || {
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("CORRELATOR_MAX_ATTEMPTS"));
    });
}

#[test]
#[serial]
fn test_sentry_credentials_enable_lookup_and_capture() {
    with_vars(
        &[
            ("SENTRY_AUTH_TOKEN", "tok"),
            ("SENTRY_ORG", "acme"),
            ("SENTRY_PROJECT", "web"),
            ("SENTRY_INGEST_URL", "https://o1.ingest.sentry.io"),
            ("SENTRY_PUBLIC_KEY", "pub"),
            ("SENTRY_PROJECT_ID", "42"),
        ],
        || {
            let config = Config::from_env().unwrap();
            assert!(config.sentry.lookup_enabled());
            assert!(config.sentry.capture_enabled());
        },
    );
}

#[test]
#[serial]
fn test_blank_values_count_as_unset() {
    with_vars(&[("GEMINI_API_KEY", "   "), ("TRACKER_ENDPOINT", "")], || {
        let config = Config::from_env().unwrap();
        assert!(config.gemini.api_key.is_none());
        assert!(config.tracker.endpoint.is_none());
    });
}

#[test]
#[serial]
fn test_success_escalation_flag() {
    assert!(!Config::from_env().unwrap().survey.escalate_success);
    with_vars(&[("SURVEY_ESCALATE_SUCCESS", "true")], || {
        let config = Config::from_env().unwrap();
        assert!(config.survey.escalate_success);
    });
    with_vars(&[("SURVEY_ESCALATE_SUCCESS", "sometimes")], || {
        assert!(Config::from_env().is_err());
    });
}
