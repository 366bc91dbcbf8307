//! Ordered delivery of analytics batches
//!
//! A single worker task per session sends batches one after another, so a
//! slow ingestion call never blocks the conversation and batches can never
//! overtake each other.

use super::AnalyticsEvent;
use crate::runtime::AnalyticsSink;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How a batch is delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTransport {
    /// Awaited ingestion call; failures are dropped
    Regular,
    /// Fire-and-forget delivery used when the visitor leaves
    Beacon,
}

#[derive(Debug)]
struct FlushJob {
    transport: FlushTransport,
    events: Vec<AnalyticsEvent>,
}

/// Sender side of a session's flush worker
pub struct FlushHandle {
    tx: mpsc::UnboundedSender<FlushJob>,
    worker: JoinHandle<()>,
}

impl FlushHandle {
    /// Queue a batch behind any batch already submitted
    pub fn submit(&self, transport: FlushTransport, events: Vec<AnalyticsEvent>) {
        if events.is_empty() {
            return;
        }
        if self.tx.send(FlushJob { transport, events }).is_err() {
            tracing::debug!("Flush worker gone, dropping analytics batch");
        }
    }

    /// Close the queue and wait until every queued batch was attempted
    pub async fn finish(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::warn!(error = %e, "Analytics flush worker panicked");
        }
    }
}

/// Start the flush worker for one session
pub fn spawn_flush_worker<A>(sink: Arc<A>, session_id: String) -> FlushHandle
where
    A: AnalyticsSink + ?Sized + 'static,
{
    let (tx, mut rx) = mpsc::unbounded_channel::<FlushJob>();

    let worker = tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            let count = job.events.len();
            match job.transport {
                FlushTransport::Regular => {
                    if let Err(e) = sink.send_batch(&session_id, &job.events).await {
                        // Analytics loss is acceptable; never retried
                        tracing::debug!(
                            session_id = %session_id,
                            count,
                            error = %e,
                            "Dropped analytics batch"
                        );
                    } else {
                        tracing::debug!(session_id = %session_id, count, "Flushed analytics batch");
                    }
                }
                FlushTransport::Beacon => {
                    sink.send_beacon(&session_id, &job.events).await;
                    tracing::debug!(session_id = %session_id, count, "Sent analytics beacon");
                }
            }
        }
    });

    FlushHandle { tx, worker }
}
