//! Local lead and analytics store
//!
//! SQLite backend used when no hosted store is configured. Leads are keyed
//! by session id so a retried completion can never produce a second row.

mod schema;

pub use schema::*;

use crate::analytics::{AnalyticsEvent, AnalyticsEventType};
use crate::state_machine::Lead;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Lead not found for session: {0}")]
    LeadNotFound(String),
    #[error("Database connection lock poisoned")]
    Poisoned,
}

pub type DbResult<T> = Result<T, DbError>;

/// Thread-safe database handle
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create database at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    /// Open an in-memory database (for testing)
    #[allow(dead_code)] // Used in tests
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    fn conn(&self) -> DbResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // ==================== Lead Operations ====================

    /// Store a lead. Returns `false` when the session already has one.
    pub fn insert_lead(&self, lead: &Lead) -> DbResult<bool> {
        let conn = self.conn()?;
        let fields = serde_json::to_string(&lead.fields)?;

        let inserted = conn.execute(
            "INSERT OR IGNORE INTO leads (session_id, source, user_type, fields, submitted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                lead.session_id,
                lead.source,
                lead.user_type,
                fields,
                lead.submitted_at.to_rfc3339()
            ],
        )?;

        Ok(inserted == 1)
    }

    /// Get the lead captured by a session
    pub fn get_lead(&self, session_id: &str) -> DbResult<LeadRecord> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, source, user_type, fields, submitted_at
             FROM leads WHERE session_id = ?1",
        )?;

        stmt.query_row(params![session_id], lead_from_row)
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => {
                    DbError::LeadNotFound(session_id.to_string())
                }
                other => DbError::Sqlite(other),
            })
    }

    /// Most recent leads first
    pub fn list_leads(&self, limit: u32) -> DbResult<Vec<LeadRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, session_id, source, user_type, fields, submitted_at
             FROM leads
             ORDER BY submitted_at DESC, id DESC
             LIMIT ?1",
        )?;

        let rows = stmt.query_map(params![limit], lead_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    // ==================== Analytics Operations ====================

    /// Append a batch of events atomically, in order
    pub fn insert_events(&self, events: &[AnalyticsEvent]) -> DbResult<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO analytics_events
                    (session_id, event_type, step_id, step_number, step_value,
                     time_on_step_ms, session_duration_ms, user_type, source, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?;
            for event in events {
                stmt.execute(params![
                    event.session_id,
                    event.event_type.as_str(),
                    event.step_id,
                    event.step_number,
                    event.step_value,
                    to_sql_millis(event.time_on_step_ms),
                    to_sql_millis(event.session_duration_ms),
                    event.user_type,
                    event.source,
                    event.created_at.to_rfc3339(),
                ])?;
            }
        }
        tx.commit()?;
        Ok(events.len())
    }

    /// All events of one session in record order
    pub fn events_for_session(&self, session_id: &str) -> DbResult<Vec<AnalyticsEvent>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT session_id, event_type, step_id, step_number, step_value,
                    time_on_step_ms, session_duration_ms, user_type, source, created_at
             FROM analytics_events
             WHERE session_id = ?1
             ORDER BY id ASC",
        )?;

        let rows = stmt.query_map(params![session_id], event_from_row)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(DbError::from)
    }

    /// Count events per type across all sessions
    pub fn funnel_counts(&self) -> DbResult<FunnelCounts> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT event_type, COUNT(*) FROM analytics_events GROUP BY event_type")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = FunnelCounts::default();
        for row in rows {
            let (kind, count) = row?;
            let count = u64::try_from(count).unwrap_or(0);
            match kind.parse::<AnalyticsEventType>() {
                Ok(AnalyticsEventType::SessionStart) => counts.session_start = count,
                Ok(AnalyticsEventType::StepCompleted) => counts.step_completed = count,
                Ok(AnalyticsEventType::FormSubmitted) => counts.form_submitted = count,
                Ok(AnalyticsEventType::SessionAbandoned) => counts.session_abandoned = count,
                Ok(AnalyticsEventType::ValidationFailed) => counts.validation_failed = count,
                Err(e) => tracing::warn!(error = %e, "Skipping unknown event type"),
            }
        }
        Ok(counts)
    }
}

fn lead_from_row(row: &Row<'_>) -> rusqlite::Result<LeadRecord> {
    let fields_json: String = row.get(4)?;
    let fields = serde_json::from_str(&fields_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(LeadRecord {
        id: row.get(0)?,
        session_id: row.get(1)?,
        source: row.get(2)?,
        user_type: row.get(3)?,
        fields,
        submitted_at: parse_datetime(&row.get::<_, String>(5)?),
    })
}

fn event_from_row(row: &Row<'_>) -> rusqlite::Result<AnalyticsEvent> {
    let kind: String = row.get(1)?;
    let event_type = kind
        .parse::<AnalyticsEventType>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?;
    Ok(AnalyticsEvent {
        session_id: row.get(0)?,
        event_type,
        step_id: row.get(2)?,
        step_number: row.get(3)?,
        step_value: row.get(4)?,
        time_on_step_ms: from_sql_millis(row.get(5)?),
        session_duration_ms: from_sql_millis(row.get(6)?),
        user_type: row.get(7)?,
        source: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
    })
}

fn to_sql_millis(ms: u64) -> i64 {
    i64::try_from(ms).unwrap_or(i64::MAX)
}

fn from_sql_millis(ms: i64) -> u64 {
    u64::try_from(ms).unwrap_or(0)
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}
