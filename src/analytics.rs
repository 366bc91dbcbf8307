//! Session analytics
//!
//! Events are buffered per session and flushed in record order: on an
//! interval, right after the form is submitted, and once through the
//! fire-and-forget beacon when the visitor leaves.

mod event;
mod flusher;
mod recorder;
mod replay;

pub use event::{AnalyticsEvent, AnalyticsEventType};
pub use flusher::{spawn_flush_worker, FlushHandle, FlushTransport};
pub use recorder::AnalyticsRecorder;
pub use replay::{replay, Replayed};
