//! Lead-capture session state machine
//!
//! Implements the Elm Architecture pattern with pure state transitions:
//! the engine never performs I/O, it returns effects for the runtime.

mod effect;
pub mod event;
pub mod state;
pub(crate) mod transition;

#[cfg(test)]
mod proptests;

pub use effect::{Effect, RenderCommand};
pub use event::{Event, UnloadReason};
pub use state::{EngineConfig, EngineContext, Lead, Session, SessionPhase};
pub use transition::{complete, transition, TransitionError, TransitionResult};
