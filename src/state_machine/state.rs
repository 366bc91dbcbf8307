//! Session state types

use crate::flow::{presets::USER_TYPE_FIELD, Fields, StepGraph};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Session
// ============================================================================

/// Lifecycle of a session. `Completed` and `Abandoned` are terminal and
/// mutually exclusive by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    #[default]
    Init,
    InProgress,
    Completed,
    Abandoned,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionPhase::Completed | SessionPhase::Abandoned)
    }
}

/// One visitor's walk through the step graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    /// Tag identifying the flow variant that produced the lead
    pub source: String,
    pub current_step_id: String,
    /// 1-based count of steps visited so far
    pub step_number: u32,
    pub fields: Fields,
    pub started_at: DateTime<Utc>,
    pub step_started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub phase: SessionPhase,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        source: impl Into<String>,
        start_step: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            source: source.into(),
            current_step_id: start_step.into(),
            step_number: 0,
            fields: Fields::new(),
            started_at: now,
            step_started_at: now,
            user_type: None,
            phase: SessionPhase::Init,
        }
    }

    pub fn completed(&self) -> bool {
        self.phase == SessionPhase::Completed
    }

    pub fn abandoned(&self) -> bool {
        self.phase == SessionPhase::Abandoned
    }

    pub fn is_closed(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn session_duration_ms(&self, now: DateTime<Utc>) -> u64 {
        millis_between(self.started_at, now)
    }

    pub fn time_on_step_ms(&self, now: DateTime<Utc>) -> u64 {
        millis_between(self.step_started_at, now)
    }
}

fn millis_between(from: DateTime<Utc>, to: DateTime<Utc>) -> u64 {
    u64::try_from((to - from).num_milliseconds()).unwrap_or(0)
}

// ============================================================================
// Lead
// ============================================================================

/// Collected answers handed to the lead persister at completion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub session_id: String,
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub fields: Fields,
    pub submitted_at: DateTime<Utc>,
}

impl Lead {
    pub fn from_session(session: &Session, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session.session_id.clone(),
            source: session.source.clone(),
            user_type: session.user_type.clone(),
            fields: session.fields.clone(),
            submitted_at: now,
        }
    }

    /// Flat record sent to the hosted store: every field plus `source`,
    /// and `userType` when it was collected under a different field name.
    pub fn to_record(&self) -> Value {
        let mut record: Map<String, Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();
        record.insert("source".to_string(), Value::String(self.source.clone()));
        if let Some(user_type) = &self.user_type {
            record
                .entry(USER_TYPE_FIELD)
                .or_insert_with(|| Value::String(user_type.clone()));
        }
        Value::Object(record)
    }
}

// ============================================================================
// Engine context
// ============================================================================

/// Tunables for the conversation engine
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Simulated typing pause before a message step auto-advances
    pub typing_delay: Duration,
    /// Field whose answer classifies the visitor (`empresa` / `criador`)
    pub user_type_field: String,
    /// Emit `validation_failed` events for rejected answers
    pub record_validation_failures: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            typing_delay: Duration::from_millis(800),
            user_type_field: USER_TYPE_FIELD.to_string(),
            record_validation_failures: false,
        }
    }
}

/// Immutable context shared by every session of one flow
#[derive(Debug, Clone)]
pub struct EngineContext {
    pub graph: Arc<StepGraph>,
    pub config: EngineConfig,
}

impl EngineContext {
    pub fn new(graph: Arc<StepGraph>, config: EngineConfig) -> Self {
        Self { graph, config }
    }
}
