//! API request and response types

use crate::analytics::{AnalyticsEvent, Replayed};
use crate::db::LeadRecord;
use crate::state_machine::UnloadReason;
use serde::{Deserialize, Serialize};

/// Request to start a new session
#[derive(Debug, Default, Deserialize)]
pub struct CreateSessionRequest {
    /// Traffic source tag; the configured default when absent
    pub source: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
}

/// Visitor answer for the current step
#[derive(Debug, Deserialize)]
pub struct AnswerRequest {
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AnswerResponse {
    pub queued: bool,
}

/// Body of the unload beacon. Browsers may send it as text, or not at all.
#[derive(Debug, Default, Deserialize)]
pub struct UnloadRequest {
    #[serde(default)]
    pub reason: UnloadReason,
}

/// Query for the stored lead listing
#[derive(Debug, Deserialize)]
pub struct LeadsQuery {
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct LeadListResponse {
    pub leads: Vec<LeadRecord>,
}

/// Stored events of one session and the progress they replay to
#[derive(Debug, Serialize)]
pub struct SessionEventsResponse {
    pub events: Vec<AnalyticsEvent>,
    /// Absent when the events don't fit the loaded flow
    pub replayed: Option<Replayed>,
}

/// Generic error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

impl ErrorResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
        }
    }
}
