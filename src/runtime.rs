//! Runtime for executing lead-capture sessions
//!
//! Each session runs in its own task that owns the `Session`, applies
//! transitions and executes the resulting effects. The manager only routes
//! events by session id.

mod executor;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::SessionRuntime;
pub use traits::*;

use crate::flow::Fields;
use crate::state_machine::{EngineContext, Event, RenderCommand, Session, SessionPhase, UnloadReason};
use chrono::Utc;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;

/// Type alias for production runtime with trait-object sinks
pub type ProductionRuntime = SessionRuntime<dyn LeadPersister>;

/// Silence after which a session is abandoned and its runtime reclaimed
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How long `shutdown_all` waits for each session to flush
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Session not found: {0}")]
    SessionNotFound(String),
    #[error("Session runtime has stopped: {0}")]
    SessionStopped(String),
}

/// Timers owned by the runtime rather than the engine
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    /// Period of the analytics flush tick
    pub flush_interval: Duration,
    /// Abandon a session after this long without visitor activity. This is
    /// also what reclaims sessions whose unload beacon never arrived.
    /// `None` disables it.
    pub idle_timeout: Option<Duration>,
    /// Random extra typing pause, up to this much
    pub typing_jitter: Duration,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            flush_interval: Duration::from_secs(10),
            idle_timeout: Some(DEFAULT_IDLE_TIMEOUT),
            typing_jitter: Duration::from_millis(400),
        }
    }
}

/// Point-in-time view of a session, published after every transition
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub session_id: String,
    pub source: String,
    pub phase: SessionPhase,
    pub current_step_id: String,
    pub step_number: u32,
    pub fields: Fields,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_type: Option<String>,
    pub progress: f32,
    /// Render commands currently on screen for the current step
    pub prompt: Vec<RenderCommand>,
}

impl SessionSnapshot {
    pub fn new(session: &Session, progress: f32, prompt: Vec<RenderCommand>) -> Self {
        Self {
            session_id: session.session_id.clone(),
            source: session.source.clone(),
            phase: session.phase,
            current_step_id: session.current_step_id.clone(),
            step_number: session.step_number,
            fields: session.fields.clone(),
            user_type: session.user_type.clone(),
            progress,
            prompt,
        }
    }
}

/// Events sent to SSE clients
#[derive(Debug, Clone)]
pub enum SseEvent {
    Init { snapshot: SessionSnapshot },
    Render { command: RenderCommand },
    Error { message: String },
}

/// Handle to interact with a running session
#[derive(Clone)]
pub struct SessionHandle {
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_tx: broadcast::Sender<SseEvent>,
    pub snapshot_rx: watch::Receiver<SessionSnapshot>,
}

struct RuntimeEntry {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

/// Manager for all session runtimes
pub struct RuntimeManager {
    context: EngineContext,
    settings: RuntimeSettings,
    default_source: String,
    persister: Arc<dyn LeadPersister>,
    analytics: Arc<dyn AnalyticsSink>,
    runtimes: Arc<RwLock<HashMap<String, RuntimeEntry>>>,
}

impl RuntimeManager {
    pub fn new(
        context: EngineContext,
        settings: RuntimeSettings,
        default_source: impl Into<String>,
        persister: Arc<dyn LeadPersister>,
        analytics: Arc<dyn AnalyticsSink>,
    ) -> Self {
        Self {
            context,
            settings,
            default_source: default_source.into(),
            persister,
            analytics,
            runtimes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn context(&self) -> &EngineContext {
        &self.context
    }

    /// Start a new session and return its id
    pub async fn create_session(&self, source: Option<String>) -> Result<String, RuntimeError> {
        let session_id = uuid::Uuid::new_v4().to_string();
        let source = source.unwrap_or_else(|| self.default_source.clone());
        let session = Session::new(
            &session_id,
            source,
            self.context.graph.start_id(),
            Utc::now(),
        );

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, _) = broadcast::channel(128);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(&session, 0.0, vec![]));

        let runtime: ProductionRuntime = SessionRuntime::new(
            self.context.clone(),
            session,
            self.settings.clone(),
            self.persister.clone(),
            self.analytics.clone(),
            event_rx,
            event_tx.clone(),
            broadcast_tx.clone(),
            snapshot_tx,
        );

        let handle = SessionHandle {
            event_tx,
            broadcast_tx,
            snapshot_rx,
        };

        // Hold the lock across spawn so the exit cleanup can never run first
        let mut runtimes = self.runtimes.write().await;
        let registry = Arc::clone(&self.runtimes);
        let id = session_id.clone();
        let task = tokio::spawn(async move {
            runtime.run().await;
            registry.write().await.remove(&id);
            tracing::info!(session_id = %id, "Session runtime finished");
        });
        runtimes.insert(
            session_id.clone(),
            RuntimeEntry {
                handle: handle.clone(),
                task,
            },
        );
        drop(runtimes);

        handle
            .event_tx
            .send(Event::Start)
            .await
            .map_err(|_| RuntimeError::SessionStopped(session_id.clone()))?;

        tracing::info!(session_id = %session_id, "Session created");
        Ok(session_id)
    }

    /// Get the handle of a live session
    pub async fn get(&self, session_id: &str) -> Result<SessionHandle, RuntimeError> {
        self.runtimes
            .read()
            .await
            .get(session_id)
            .map(|entry| entry.handle.clone())
            .ok_or_else(|| RuntimeError::SessionNotFound(session_id.to_string()))
    }

    /// Send an event to a session
    pub async fn send_event(&self, session_id: &str, event: Event) -> Result<(), RuntimeError> {
        let handle = self.get(session_id).await?;
        handle
            .event_tx
            .send(event)
            .await
            .map_err(|_| RuntimeError::SessionStopped(session_id.to_string()))
    }

    /// Latest published snapshot
    pub async fn snapshot(&self, session_id: &str) -> Result<SessionSnapshot, RuntimeError> {
        let handle = self.get(session_id).await?;
        let snapshot = handle.snapshot_rx.borrow().clone();
        Ok(snapshot)
    }

    /// Subscribe to session updates, starting from the current snapshot
    pub async fn subscribe(
        &self,
        session_id: &str,
    ) -> Result<(SessionSnapshot, broadcast::Receiver<SseEvent>), RuntimeError> {
        let handle = self.get(session_id).await?;
        // Subscribe before reading the snapshot so nothing falls in between
        let rx = handle.broadcast_tx.subscribe();
        let snapshot = handle.snapshot_rx.borrow().clone();
        Ok((snapshot, rx))
    }

    /// Teardown signal from the page. Unknown or finished sessions are
    /// ignored; returns whether a live session received it.
    pub async fn unload(&self, session_id: &str, reason: UnloadReason) -> bool {
        match self.send_event(session_id, Event::Unload { reason }).await {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Unload for inactive session");
                false
            }
        }
    }

    pub async fn active_count(&self) -> usize {
        self.runtimes.read().await.len()
    }

    /// Abandon every live session and wait for their final flush
    pub async fn shutdown_all(&self) {
        let entries: Vec<(String, RuntimeEntry)> = self.runtimes.write().await.drain().collect();
        if entries.is_empty() {
            return;
        }
        tracing::info!(count = entries.len(), "Shutting down sessions");

        for (session_id, entry) in &entries {
            let unload = Event::Unload {
                reason: UnloadReason::Shutdown,
            };
            if entry.handle.event_tx.send(unload).await.is_err() {
                tracing::debug!(session_id = %session_id, "Session already stopped");
            }
        }

        for (session_id, entry) in entries {
            if tokio::time::timeout(SHUTDOWN_GRACE, entry.task).await.is_err() {
                tracing::warn!(session_id = %session_id, "Session did not stop in time");
            }
        }
    }
}
