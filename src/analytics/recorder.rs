//! Per-session analytics buffer

use super::AnalyticsEvent;

/// Ordered, append-only buffer of one session's events.
///
/// Batches handed out by `take_batch` always belong to this session and
/// preserve record order; events for another session are refused.
#[derive(Debug)]
pub struct AnalyticsRecorder {
    session_id: String,
    buffer: Vec<AnalyticsEvent>,
    recorded: usize,
    flushed: usize,
    beacon_sent: bool,
}

impl AnalyticsRecorder {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            buffer: Vec::new(),
            recorded: 0,
            flushed: 0,
            beacon_sent: false,
        }
    }

    /// Append an event. Returns `false` if it belongs to another session.
    pub fn record(&mut self, event: AnalyticsEvent) -> bool {
        if event.session_id != self.session_id {
            tracing::warn!(
                session_id = %self.session_id,
                other = %event.session_id,
                "Dropping analytics event recorded against the wrong session"
            );
            return false;
        }
        self.buffer.push(event);
        self.recorded += 1;
        true
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drain everything recorded since the last flush
    pub fn take_batch(&mut self) -> Option<Vec<AnalyticsEvent>> {
        if self.buffer.is_empty() {
            return None;
        }
        let batch = std::mem::take(&mut self.buffer);
        self.flushed += batch.len();
        Some(batch)
    }

    /// Drain for the unload beacon. Only the first call hands out a batch,
    /// so repeated unload signals never send twice.
    pub fn take_beacon_batch(&mut self) -> Option<Vec<AnalyticsEvent>> {
        if self.beacon_sent {
            return None;
        }
        self.beacon_sent = true;
        self.take_batch()
    }

    /// (recorded, flushed) counters
    #[allow(dead_code)] // Used by tests
    pub fn stats(&self) -> (usize, usize) {
        (self.recorded, self.flushed)
    }
}
