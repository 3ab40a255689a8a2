use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info, warn};

use super::{Incident, IncidentDiagnostics, Storage, SuccessSignal};
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};
use crate::events::{EventPayload, TelemetryEvent, TriggerType};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Fixed-width timestamps so lexical order matches time order.
fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn to_json<T: serde::Serialize>(value: &Option<T>) -> Option<String> {
    value.as_ref().and_then(|v| serde_json::to_string(v).ok())
}

/// SQLite-backed storage implementation
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage instance
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// In-memory database for tests. A single connection is kept open for
    /// the pool's lifetime since each connection sees its own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let storage = Self { pool };
        storage.run_migrations().await?;

        Ok(storage)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn insert_events(&self, events: &[TelemetryEvent]) -> StorageResult<()> {
        if events.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for event in events {
            sqlx::query(
                r#"
                INSERT INTO events (session_id, type, ts, page, variant, meta)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&event.session_id)
            .bind(event.kind())
            .bind(event.ts)
            .bind(&event.page)
            .bind(&event.variant)
            .bind(event.payload.meta().to_string())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = events.len(), "Events stored");
        Ok(())
    }

    async fn get_session_events(&self, session_id: &str, limit: u32) -> StorageResult<Vec<TelemetryEvent>> {
        let rows: Vec<EventRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, type, ts, page, variant, meta FROM (
                SELECT id, session_id, type, ts, page, variant, meta
                FROM events
                WHERE session_id = ?
                ORDER BY ts DESC, id DESC
                LIMIT ?
            )
            ORDER BY ts ASC, id ASC
            "#,
        )
        .bind(session_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().filter_map(EventRow::decode).collect())
    }

    async fn create_incident(&self, incident: &Incident) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO incidents (
                id, session_id, page, trigger_type, confidence, friction_score,
                external_error_id, external_issue_id, repro_script,
                root_cause_ranking, ai_report, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&incident.id)
        .bind(&incident.session_id)
        .bind(&incident.page)
        .bind(incident.trigger_type.as_str())
        .bind(incident.confidence)
        .bind(incident.friction_score)
        .bind(&incident.external_error_id)
        .bind(&incident.external_issue_id)
        .bind(&incident.repro_script)
        .bind(to_json(&incident.root_cause_ranking))
        .bind(to_json(&incident.ai_report))
        .bind(timestamp(&incident.created_at))
        .execute(&self.pool)
        .await?;

        info!(
            incident_id = %incident.id,
            session_id = %incident.session_id,
            trigger = %incident.trigger_type,
            "Incident created"
        );
        Ok(())
    }

    async fn get_incident(&self, id: &str) -> StorageResult<Option<Incident>> {
        let row: Option<IncidentRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, page, trigger_type, confidence, friction_score,
                   external_error_id, external_issue_id, repro_script,
                   root_cause_ranking, ai_report, created_at
            FROM incidents
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Incident::try_from).transpose()
    }

    async fn get_latest_incident(&self, session_id: &str) -> StorageResult<Option<Incident>> {
        let row: Option<IncidentRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, page, trigger_type, confidence, friction_score,
                   external_error_id, external_issue_id, repro_script,
                   root_cause_ranking, ai_report, created_at
            FROM incidents
            WHERE session_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Incident::try_from).transpose()
    }

    async fn update_incident_diagnostics(&self, id: &str, diagnostics: &IncidentDiagnostics) -> StorageResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE incidents
            SET external_error_id = COALESCE(?, external_error_id),
                external_issue_id = COALESCE(?, external_issue_id),
                repro_script = COALESCE(?, repro_script),
                root_cause_ranking = COALESCE(?, root_cause_ranking),
                ai_report = COALESCE(?, ai_report)
            WHERE id = ?
            "#,
        )
        .bind(&diagnostics.external_error_id)
        .bind(&diagnostics.external_issue_id)
        .bind(&diagnostics.repro_script)
        .bind(to_json(&diagnostics.root_cause_ranking))
        .bind(to_json(&diagnostics.ai_report))
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::IncidentNotFound {
                incident_id: id.to_string(),
            });
        }

        info!(incident_id = %id, "Incident diagnostics updated");
        Ok(())
    }

    async fn create_success_signal(&self, signal: &SuccessSignal) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO success_signals (
                id, session_id, flow_name, time_to_complete_ms, friction_score,
                error_count, performance_score, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&signal.id)
        .bind(&signal.session_id)
        .bind(&signal.flow_name)
        .bind(signal.time_to_complete_ms)
        .bind(signal.friction_score)
        .bind(signal.error_count)
        .bind(signal.performance_score)
        .bind(timestamp(&signal.created_at))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_session_success_signals(&self, session_id: &str) -> StorageResult<Vec<SuccessSignal>> {
        let rows: Vec<SuccessSignalRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, flow_name, time_to_complete_ms, friction_score,
                   error_count, performance_score, created_at
            FROM success_signals
            WHERE session_id = ?
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }
}

// Internal row types for SQLx mapping
#[derive(sqlx::FromRow)]
struct EventRow {
    id: i64,
    session_id: String,
    #[sqlx(rename = "type")]
    kind: String,
    ts: i64,
    page: String,
    variant: Option<String>,
    meta: String,
}

impl EventRow {
    /// Rows written by older clients may not decode; those are skipped.
    fn decode(self) -> Option<TelemetryEvent> {
        let meta = serde_json::from_str(&self.meta).unwrap_or(serde_json::Value::Null);
        match EventPayload::decode(&self.kind, meta) {
            Ok(payload) => Some(TelemetryEvent {
                ts: self.ts,
                session_id: self.session_id,
                page: self.page,
                variant: self.variant,
                payload,
            }),
            Err(e) => {
                warn!(row_id = self.id, error = %e, "Skipping undecodable event row");
                None
            }
        }
    }
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: String,
    session_id: String,
    page: String,
    trigger_type: String,
    confidence: f64,
    friction_score: i64,
    external_error_id: Option<String>,
    external_issue_id: Option<String>,
    repro_script: Option<String>,
    root_cause_ranking: Option<String>,
    ai_report: Option<String>,
    created_at: String,
}

impl TryFrom<IncidentRow> for Incident {
    type Error = StorageError;

    fn try_from(row: IncidentRow) -> Result<Self, Self::Error> {
        let trigger_type =
            TriggerType::from_str(&row.trigger_type).map_err(|message| StorageError::Query { message })?;

        Ok(Self {
            id: row.id,
            session_id: row.session_id,
            page: row.page,
            trigger_type,
            confidence: row.confidence,
            friction_score: row.friction_score,
            external_error_id: row.external_error_id,
            external_issue_id: row.external_issue_id,
            repro_script: row.repro_script,
            root_cause_ranking: row
                .root_cause_ranking
                .and_then(|s| serde_json::from_str(&s).ok()),
            ai_report: row.ai_report.and_then(|s| serde_json::from_str(&s).ok()),
            created_at: parse_timestamp(&row.created_at),
        })
    }
}

#[derive(sqlx::FromRow)]
struct SuccessSignalRow {
    id: String,
    session_id: String,
    flow_name: String,
    time_to_complete_ms: i64,
    friction_score: i64,
    error_count: i64,
    performance_score: i64,
    created_at: String,
}

impl From<SuccessSignalRow> for SuccessSignal {
    fn from(row: SuccessSignalRow) -> Self {
        Self {
            id: row.id,
            session_id: row.session_id,
            flow_name: row.flow_name,
            time_to_complete_ms: row.time_to_complete_ms,
            friction_score: row.friction_score,
            error_count: row.error_count,
            performance_score: row.performance_score,
            created_at: parse_timestamp(&row.created_at),
        }
    }
}
