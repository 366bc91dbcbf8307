//! Events that drive a session

use serde::{Deserialize, Serialize};

/// Events that trigger state transitions
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// First interaction: enter the start step
    Start,
    /// The typing pause for a message step is over
    TypingElapsed { step_id: String },
    /// Visitor submitted free text or picked an option
    Answer { value: String },
    /// Visitor left or the session is being torn down
    Unload { reason: UnloadReason },
}

/// Why a session is being torn down
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UnloadReason {
    /// Tab hidden (mobile browsers may never fire an actual unload)
    VisibilityHidden,
    #[default]
    PageUnload,
    /// No answer within the configured idle timeout
    IdleTimeout,
    /// Server shutting down
    Shutdown,
}

impl UnloadReason {
    /// Whether the page is gone, so only the beacon transport can deliver
    pub fn is_page_exit(self) -> bool {
        matches!(self, UnloadReason::VisibilityHidden | UnloadReason::PageUnload)
    }
}
