//! Database schema and types

use crate::flow::Fields;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// SQL schema for initialization
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS leads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL UNIQUE,
    source TEXT NOT NULL,
    user_type TEXT,
    fields TEXT NOT NULL,
    submitted_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_leads_submitted ON leads(submitted_at DESC);

CREATE TABLE IF NOT EXISTS analytics_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    event_type TEXT NOT NULL,
    step_id TEXT NOT NULL,
    step_number INTEGER NOT NULL,
    step_value TEXT,
    time_on_step_ms INTEGER NOT NULL,
    session_duration_ms INTEGER NOT NULL,
    user_type TEXT,
    source TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_session ON analytics_events(session_id, id);
CREATE INDEX IF NOT EXISTS idx_events_type ON analytics_events(event_type);
";

/// Stored lead row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadRecord {
    pub id: i64,
    pub session_id: String,
    pub source: String,
    pub user_type: Option<String>,
    pub fields: Fields,
    pub submitted_at: DateTime<Utc>,
}

/// Event counts per type, used for a quick funnel view
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunnelCounts {
    pub session_start: u64,
    pub step_completed: u64,
    pub form_submitted: u64,
    pub session_abandoned: u64,
    pub validation_failed: u64,
}
