//! Effects produced by state transitions

use crate::analytics::{AnalyticsEvent, FlushTransport};
use crate::flow::OptionItem;
use crate::state_machine::state::{Lead, SessionPhase};
use serde::Serialize;
use std::time::Duration;

/// Presentation commands for whatever renders the chat
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RenderCommand {
    ShowMessage {
        step_id: String,
        text: String,
        progress: f32,
    },
    ShowOptions {
        step_id: String,
        options: Vec<OptionItem>,
    },
    AwaitInput {
        step_id: String,
    },
    ShowError {
        step_id: String,
        message: String,
    },
    Closed {
        phase: SessionPhase,
    },
}

/// Effects to be executed after state transition
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Send a command to the renderer
    Render(RenderCommand),

    /// Feed `TypingElapsed` back after `delay`
    ScheduleTyping { step_id: String, delay: Duration },

    /// Cancel any scheduled typing delay
    CancelPending,

    /// Append to the session's analytics buffer
    Record(AnalyticsEvent),

    /// Hand the buffered analytics to the sink
    FlushAnalytics { transport: FlushTransport },

    /// Store the lead (at most once per session)
    PersistLead(Lead),

    /// Session reached a terminal phase; the runtime may shut down
    SessionEnded,
}

impl Effect {
    pub fn show_message(step_id: impl Into<String>, text: String, progress: f32) -> Self {
        Effect::Render(RenderCommand::ShowMessage {
            step_id: step_id.into(),
            text,
            progress,
        })
    }

    pub fn show_error(step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Effect::Render(RenderCommand::ShowError {
            step_id: step_id.into(),
            message: message.into(),
        })
    }

    pub fn await_input(step_id: impl Into<String>) -> Self {
        Effect::Render(RenderCommand::AwaitInput {
            step_id: step_id.into(),
        })
    }

    pub fn closed(phase: SessionPhase) -> Self {
        Effect::Render(RenderCommand::Closed { phase })
    }
}
