//! Analytics event records

use crate::state_machine::Session;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyticsEventType {
    SessionStart,
    StepCompleted,
    FormSubmitted,
    SessionAbandoned,
    /// Only recorded when enabled in the engine config
    ValidationFailed,
}

impl AnalyticsEventType {
    pub fn as_str(self) -> &'static str {
        match self {
            AnalyticsEventType::SessionStart => "session_start",
            AnalyticsEventType::StepCompleted => "step_completed",
            AnalyticsEventType::FormSubmitted => "form_submitted",
            AnalyticsEventType::SessionAbandoned => "session_abandoned",
            AnalyticsEventType::ValidationFailed => "validation_failed",
        }
    }
}

impl fmt::Display for AnalyticsEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalyticsEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "session_start" => Ok(AnalyticsEventType::SessionStart),
            "step_completed" => Ok(AnalyticsEventType::StepCompleted),
            "form_submitted" => Ok(AnalyticsEventType::FormSubmitted),
            "session_abandoned" => Ok(AnalyticsEventType::SessionAbandoned),
            "validation_failed" => Ok(AnalyticsEventType::ValidationFailed),
            other => Err(format!("unknown analytics event type: {other}")),
        }
    }
}

/// Immutable telemetry record for one session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyticsEvent {
    pub session_id: String,
    pub event_type: AnalyticsEventType,
    pub step_id: String,
    pub step_number: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_value: Option<String>,
    pub time_on_step_ms: u64,
    pub session_duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

impl AnalyticsEvent {
    /// Snapshot the session's current step, counters and classification
    pub fn for_session(
        event_type: AnalyticsEventType,
        session: &Session,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session.session_id.clone(),
            event_type,
            step_id: session.current_step_id.clone(),
            step_number: session.step_number,
            step_value: None,
            time_on_step_ms: session.time_on_step_ms(now),
            session_duration_ms: session.session_duration_ms(now),
            user_type: session.user_type.clone(),
            source: session.source.clone(),
            created_at: now,
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.step_value = Some(value.into());
        self
    }
}
