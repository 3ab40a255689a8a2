use thiserror::Error;

/// Application-level errors
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("External service error: {0}")]
    External(#[from] ExternalError),

    #[error("Invalid request: {0}")]
    Invalid(#[from] ToolError),
}

/// Storage layer errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database connection failed: {message}")]
    Connection { message: String },

    #[error("Query failed: {message}")]
    Query { message: String },

    #[error("Incident not found: {incident_id}")]
    IncidentNotFound { incident_id: String },

    #[error("Migration failed: {message}")]
    Migration { message: String },

    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

/// Errors raised by external HTTP collaborators (error tracker, report
/// generator, survey collector, ingestion endpoint).
#[derive(Debug, Error)]
pub enum ExternalError {
    #[error("{service} unavailable: {message} (retries: {retries})")]
    Unavailable {
        service: &'static str,
        message: String,
        retries: u32,
    },

    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    #[error("Invalid response: {message}")]
    InvalidResponse { message: String },

    #[error("Request timeout after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// MCP protocol errors
#[derive(Debug, Error)]
pub enum McpError {
    #[error("Unknown tool: {tool_name}")]
    UnknownTool { tool_name: String },

    #[error("Invalid parameters for {tool_name}: {message}")]
    InvalidParameters { tool_name: String, message: String },

    #[error("Tool execution failed: {message}")]
    ExecutionFailed { message: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Client-fault errors raised while validating requests.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Validation failed: {field} - {reason}")]
    Validation { field: String, reason: String },

    #[error("Decode failed: {message}")]
    Decode { message: String },
}

impl AppError {
    /// Whether the error was caused by the caller's input rather than the
    /// pipeline itself.
    pub fn is_client_fault(&self) -> bool {
        matches!(self, AppError::Invalid(_))
    }
}

impl From<AppError> for McpError {
    fn from(err: AppError) -> Self {
        McpError::ExecutionFailed {
            message: err.to_string(),
        }
    }
}

/// Result type alias for application errors
pub type AppResult<T> = Result<T, AppError>;

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Result type alias for external service calls
pub type ExternalResult<T> = Result<T, ExternalError>;

/// Result type alias for MCP operations
pub type McpResult<T> = Result<T, McpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_display() {
        let err = AppError::Config {
            message: "bad value".to_string(),
        };
        assert_eq!(err.to_string(), "Configuration error: bad value");
    }

    #[test]
    fn test_storage_error_display() {
        let err = StorageError::Connection {
            message: "failed to connect".to_string(),
        };
        assert_eq!(err.to_string(), "Database connection failed: failed to connect");

        let err = StorageError::IncidentNotFound {
            incident_id: "inc-1".to_string(),
        };
        assert_eq!(err.to_string(), "Incident not found: inc-1");

        let err = StorageError::Migration {
            message: "version mismatch".to_string(),
        };
        assert_eq!(err.to_string(), "Migration failed: version mismatch");
    }

    #[test]
    fn test_external_error_display() {
        let err = ExternalError::Unavailable {
            service: "sentry",
            message: "down".to_string(),
            retries: 2,
        };
        assert_eq!(err.to_string(), "sentry unavailable: down (retries: 2)");

        let err = ExternalError::Api {
            status: 401,
            message: "unauthorized".to_string(),
        };
        assert_eq!(err.to_string(), "API error: 401 - unauthorized");

        let err = ExternalError::Timeout { timeout_ms: 5000 };
        assert_eq!(err.to_string(), "Request timeout after 5000ms");

        let err = ExternalError::NotConfigured { service: "gemini" };
        assert_eq!(err.to_string(), "gemini is not configured");
    }

    #[test]
    fn test_tool_error_conversion_to_app_error() {
        let tool_err = ToolError::Validation {
            field: "session_id".to_string(),
            reason: "missing".to_string(),
        };
        let app_err: AppError = tool_err.into();
        assert!(matches!(app_err, AppError::Invalid(_)));
        assert!(app_err.is_client_fault());
        assert_eq!(
            app_err.to_string(),
            "Invalid request: Validation failed: session_id - missing"
        );
    }

    #[test]
    fn test_app_error_conversion_to_mcp_error() {
        let app_err = AppError::Config {
            message: "test error".to_string(),
        };
        let mcp_err: McpError = app_err.into();
        assert!(matches!(mcp_err, McpError::ExecutionFailed { .. }));
        assert!(mcp_err.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_nested_conversions() {
        let app_err: AppError = StorageError::IncidentNotFound {
            incident_id: "x".to_string(),
        }
        .into();
        assert!(matches!(app_err, AppError::Storage(_)));

        let app_err: AppError = ExternalError::Timeout { timeout_ms: 1 }.into();
        assert!(matches!(app_err, AppError::External(_)));
    }
}
