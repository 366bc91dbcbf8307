//! Session runtime executor

use super::traits::{AnalyticsSink, LeadPersister};
use super::{RuntimeSettings, SessionSnapshot, SseEvent};

use crate::analytics::{spawn_flush_worker, AnalyticsRecorder, FlushHandle, FlushTransport};
use crate::state_machine::{
    transition, Effect, EngineContext, Event, Lead, RenderCommand, Session, TransitionError,
    UnloadReason,
};
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Runtime for one session, generic over the lead persister
pub struct SessionRuntime<P>
where
    P: LeadPersister + ?Sized + 'static,
{
    context: EngineContext,
    session: Session,
    settings: RuntimeSettings,
    persister: Arc<P>,
    recorder: AnalyticsRecorder,
    flusher: FlushHandle,
    event_rx: mpsc::Receiver<Event>,
    event_tx: mpsc::Sender<Event>,
    broadcast_tx: broadcast::Sender<SseEvent>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
    /// Render commands on screen for the current step
    prompt: Vec<RenderCommand>,
    /// Token to cancel the pending typing delay
    typing_cancel_token: Option<CancellationToken>,
    idle_deadline: Option<Instant>,
    ended: bool,
}

impl<P> SessionRuntime<P>
where
    P: LeadPersister + ?Sized + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new<A>(
        context: EngineContext,
        session: Session,
        settings: RuntimeSettings,
        persister: Arc<P>,
        analytics: Arc<A>,
        event_rx: mpsc::Receiver<Event>,
        event_tx: mpsc::Sender<Event>,
        broadcast_tx: broadcast::Sender<SseEvent>,
        snapshot_tx: watch::Sender<SessionSnapshot>,
    ) -> Self
    where
        A: AnalyticsSink + ?Sized + 'static,
    {
        let recorder = AnalyticsRecorder::new(&session.session_id);
        let flusher = spawn_flush_worker(analytics, session.session_id.clone());
        Self {
            context,
            session,
            settings,
            persister,
            recorder,
            flusher,
            event_rx,
            event_tx,
            broadcast_tx,
            snapshot_tx,
            prompt: Vec::new(),
            typing_cancel_token: None,
            idle_deadline: None,
            ended: false,
        }
    }

    pub async fn run(mut self) {
        let session_id = self.session.session_id.clone();
        tracing::info!(session_id = %session_id, "Starting session runtime");

        let period = self.settings.flush_interval;
        let mut flush_tick = tokio::time::interval_at(Instant::now() + period, period);
        flush_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.reset_idle_deadline();

        while !self.ended {
            let idle_deadline = self.idle_deadline;
            tokio::select! {
                event = self.event_rx.recv() => {
                    let Some(event) = event else { break };
                    self.handle_event(event).await;
                }
                _ = flush_tick.tick() => {
                    self.flush(FlushTransport::Regular);
                }
                () = idle_wait(idle_deadline) => {
                    tracing::info!(session_id = %session_id, "Session idle, abandoning");
                    self.idle_deadline = None;
                    self.handle_event(Event::Unload { reason: UnloadReason::IdleTimeout }).await;
                }
            }
        }

        // Whatever is still buffered goes out before the worker is closed
        self.cancel_typing();
        self.flush(FlushTransport::Regular);
        self.flusher.finish().await;

        tracing::info!(session_id = %session_id, phase = ?self.session.phase, "Session runtime stopped");
    }

    async fn handle_event(&mut self, event: Event) {
        if let Err(e) = self.process_event(event).await {
            // Late or duplicate UI events; the session is unchanged
            tracing::debug!(session_id = %self.session.session_id, error = %e, "Event rejected");
            let _ = self.broadcast_tx.send(SseEvent::Error {
                message: e.to_string(),
            });
        }
    }

    async fn process_event(&mut self, event: Event) -> Result<(), TransitionError> {
        // Any visitor event counts as activity, even one the engine rejects
        if matches!(event, Event::Start | Event::Answer { .. }) && !self.session.is_closed() {
            self.reset_idle_deadline();
        }

        // Pure state transition
        let result = transition(&self.session, &self.context, event, Utc::now())?;
        self.session = result.new_session;

        for effect in result.effects {
            self.execute_effect(effect).await;
        }

        self.publish_snapshot();
        Ok(())
    }

    /// Execute an effect
    async fn execute_effect(&mut self, effect: Effect) {
        match effect {
            Effect::Render(command) => {
                self.track_prompt(&command);
                let _ = self.broadcast_tx.send(SseEvent::Render { command });
            }

            Effect::ScheduleTyping { step_id, delay } => {
                self.cancel_typing();
                let token = CancellationToken::new();
                self.typing_cancel_token = Some(token.clone());

                let delay = self.with_jitter(delay);
                let event_tx = self.event_tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        () = token.cancelled() => {}
                        () = tokio::time::sleep(delay) => {
                            let _ = event_tx.send(Event::TypingElapsed { step_id }).await;
                        }
                    }
                });
            }

            Effect::CancelPending => {
                self.cancel_typing();
                self.idle_deadline = None;
            }

            Effect::Record(event) => {
                self.recorder.record(event);
            }

            Effect::FlushAnalytics { transport } => {
                self.flush(transport);
            }

            Effect::PersistLead(lead) => {
                self.persist_lead(&lead).await;
            }

            Effect::SessionEnded => {
                self.cancel_typing();
                self.idle_deadline = None;
                self.ended = true;
            }
        }
    }

    /// Lead loss is tolerated: failures are logged and the session stays
    /// completed.
    async fn persist_lead(&self, lead: &Lead) {
        match self.persister.persist(lead).await {
            Ok(()) => {
                tracing::info!(
                    session_id = %lead.session_id,
                    user_type = ?lead.user_type,
                    "Lead stored"
                );
            }
            Err(e) => {
                tracing::warn!(session_id = %lead.session_id, error = %e, "Failed to store lead");
            }
        }
    }

    fn flush(&mut self, transport: FlushTransport) {
        let batch = match transport {
            FlushTransport::Regular => self.recorder.take_batch(),
            FlushTransport::Beacon => self.recorder.take_beacon_batch(),
        };
        if let Some(events) = batch {
            self.flusher.submit(transport, events);
        }
    }

    fn cancel_typing(&mut self) {
        if let Some(token) = self.typing_cancel_token.take() {
            token.cancel();
        }
    }

    fn reset_idle_deadline(&mut self) {
        self.idle_deadline = self
            .settings
            .idle_timeout
            .map(|timeout| Instant::now() + timeout);
    }

    fn with_jitter(&self, delay: Duration) -> Duration {
        let max = u64::try_from(self.settings.typing_jitter.as_millis()).unwrap_or(0);
        if max == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max))
    }

    fn track_prompt(&mut self, command: &RenderCommand) {
        match command {
            RenderCommand::ShowMessage { .. } => {
                self.prompt.clear();
                self.prompt.push(command.clone());
            }
            RenderCommand::ShowError { .. } => {
                self.prompt
                    .retain(|c| !matches!(c, RenderCommand::ShowError { .. }));
                self.prompt.push(command.clone());
            }
            _ => {
                if !self.prompt.contains(command) {
                    self.prompt.push(command.clone());
                }
            }
        }
    }

    fn publish_snapshot(&self) {
        let progress = self.context.graph.progress(&self.session.current_step_id);
        let snapshot = SessionSnapshot::new(&self.session, progress, self.prompt.clone());
        self.snapshot_tx.send_replace(snapshot);
    }
}

async fn idle_wait(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending::<()>().await,
    }
}
