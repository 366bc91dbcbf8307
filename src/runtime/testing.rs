//! Mock implementations for testing
//!
//! These mocks enable integration testing without real I/O.

use super::traits::*;
use super::{RuntimeSettings, SessionRuntime, SessionSnapshot, SseEvent};
use crate::analytics::{AnalyticsEvent, AnalyticsEventType};
use crate::flow::{presets, StepGraph};
use crate::state_machine::{
    EngineConfig, EngineContext, Event, Lead, RenderCommand, Session, SessionPhase, UnloadReason,
};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

// ============================================================================
// Mock Lead Persister
// ============================================================================

/// Mock persister that records every lead it is given
#[allow(dead_code)]
pub struct MockPersister {
    /// Record of all leads received, including failed attempts
    pub leads: Mutex<Vec<Lead>>,
    fail: bool,
}

#[allow(dead_code)]
impl MockPersister {
    pub fn new() -> Self {
        Self {
            leads: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    /// A persister whose every call fails
    pub fn failing() -> Self {
        Self {
            leads: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn recorded_leads(&self) -> Vec<Lead> {
        self.leads.lock().unwrap().clone()
    }
}

impl Default for MockPersister {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LeadPersister for MockPersister {
    async fn persist(&self, lead: &Lead) -> Result<(), SinkError> {
        self.leads.lock().unwrap().push(lead.clone());
        if self.fail {
            return Err(SinkError::Status {
                status: 503,
                body: "mock outage".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Mock Analytics Sink
// ============================================================================

/// One delivered batch
#[derive(Debug, Clone)]
pub struct DeliveredBatch {
    pub session_id: String,
    pub beacon: bool,
    pub events: Vec<AnalyticsEvent>,
}

/// Mock analytics sink that keeps delivered batches in order
#[allow(dead_code)]
pub struct MockAnalyticsSink {
    pub batches: Mutex<Vec<DeliveredBatch>>,
}

#[allow(dead_code)]
impl MockAnalyticsSink {
    pub fn new() -> Self {
        Self {
            batches: Mutex::new(Vec::new()),
        }
    }

    pub fn delivered(&self) -> Vec<DeliveredBatch> {
        self.batches.lock().unwrap().clone()
    }

    /// Every delivered event, in delivery order
    pub fn all_events(&self) -> Vec<AnalyticsEvent> {
        self.delivered()
            .into_iter()
            .flat_map(|batch| batch.events)
            .collect()
    }

    pub fn event_types(&self) -> Vec<AnalyticsEventType> {
        self.all_events().iter().map(|e| e.event_type).collect()
    }
}

impl Default for MockAnalyticsSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AnalyticsSink for MockAnalyticsSink {
    async fn send_batch(
        &self,
        session_id: &str,
        events: &[AnalyticsEvent],
    ) -> Result<(), SinkError> {
        self.batches.lock().unwrap().push(DeliveredBatch {
            session_id: session_id.to_string(),
            beacon: false,
            events: events.to_vec(),
        });
        Ok(())
    }

    async fn send_beacon(&self, session_id: &str, events: &[AnalyticsEvent]) {
        self.batches.lock().unwrap().push(DeliveredBatch {
            session_id: session_id.to_string(),
            beacon: true,
            events: events.to_vec(),
        });
    }
}

// ============================================================================
// Test Runtime Builder
// ============================================================================

/// Running session plus the mocks behind it
pub struct TestRuntime {
    pub persister: Arc<MockPersister>,
    pub analytics: Arc<MockAnalyticsSink>,
    pub event_tx: mpsc::Sender<Event>,
    pub broadcast_rx: broadcast::Receiver<SseEvent>,
    pub snapshot_rx: watch::Receiver<SessionSnapshot>,
    runtime_handle: JoinHandle<()>,
}

impl TestRuntime {
    #[allow(clippy::new_ret_no_self)]
    pub fn new() -> TestRuntimeBuilder {
        TestRuntimeBuilder::new()
    }
}

pub struct TestRuntimeBuilder {
    graph: Option<StepGraph>,
    config: EngineConfig,
    settings: RuntimeSettings,
    persister: Option<MockPersister>,
}

#[allow(dead_code)]
impl TestRuntimeBuilder {
    pub fn new() -> Self {
        Self {
            graph: None,
            config: EngineConfig {
                typing_delay: Duration::from_millis(10),
                ..EngineConfig::default()
            },
            settings: RuntimeSettings {
                flush_interval: Duration::from_secs(60),
                idle_timeout: None,
                typing_jitter: Duration::ZERO,
            },
            persister: None,
        }
    }

    pub fn graph(mut self, graph: StepGraph) -> Self {
        self.graph = Some(graph);
        self
    }

    pub fn typing_delay(mut self, delay: Duration) -> Self {
        self.config.typing_delay = delay;
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.settings.flush_interval = interval;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.settings.idle_timeout = Some(timeout);
        self
    }

    pub fn persister(mut self, persister: MockPersister) -> Self {
        self.persister = Some(persister);
        self
    }

    pub fn build(self) -> TestRuntime {
        let graph = match self.graph {
            Some(graph) => graph,
            None => presets::lead_flow().expect("lead flow is valid"),
        };
        let context = EngineContext::new(Arc::new(graph), self.config);
        let session = Session::new("test-session", "chatbot", context.graph.start_id(), Utc::now());

        let persister = Arc::new(self.persister.unwrap_or_default());
        let analytics = Arc::new(MockAnalyticsSink::new());

        let (event_tx, event_rx) = mpsc::channel(32);
        let (broadcast_tx, broadcast_rx) = broadcast::channel(128);
        let (snapshot_tx, snapshot_rx) = watch::channel(SessionSnapshot::new(&session, 0.0, vec![]));

        let runtime = SessionRuntime::new(
            context,
            session,
            self.settings,
            persister.clone(),
            analytics.clone(),
            event_rx,
            event_tx.clone(),
            broadcast_tx,
            snapshot_tx,
        );

        let runtime_handle = tokio::spawn(async move {
            runtime.run().await;
        });

        TestRuntime {
            persister,
            analytics,
            event_tx,
            broadcast_rx,
            snapshot_rx,
            runtime_handle,
        }
    }
}

impl Default for TestRuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl TestRuntime {
    pub async fn send(&self, event: Event) {
        self.event_tx
            .send(event)
            .await
            .expect("Failed to send event");
    }

    pub async fn start(&self) {
        self.send(Event::Start).await;
    }

    pub async fn unload(&self, reason: UnloadReason) {
        self.send(Event::Unload { reason }).await;
    }

    /// Wait until the session sits on `step_id`, then answer it
    pub async fn answer_at(&mut self, step_id: &str, value: &str) {
        assert!(
            self.wait_for_step(step_id, Duration::from_secs(2)).await,
            "never reached step {step_id}"
        );
        self.send(Event::Answer {
            value: value.to_string(),
        })
        .await;
    }

    pub async fn wait_for_snapshot(
        &mut self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
        timeout: Duration,
    ) -> bool {
        matches!(
            tokio::time::timeout(timeout, self.snapshot_rx.wait_for(predicate)).await,
            Ok(Ok(_))
        )
    }

    pub async fn wait_for_step(&mut self, step_id: &str, timeout: Duration) -> bool {
        self.wait_for_snapshot(
            |s| s.phase == SessionPhase::InProgress && s.current_step_id == step_id,
            timeout,
        )
        .await
    }

    /// Wait for a render command matching `predicate`
    pub async fn wait_for_render(
        &mut self,
        mut predicate: impl FnMut(&RenderCommand) -> bool,
        timeout: Duration,
    ) -> Option<RenderCommand> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.broadcast_rx.recv()).await {
                Ok(Ok(SseEvent::Render { command })) if predicate(&command) => {
                    return Some(command)
                }
                _ => continue,
            }
        }
        None
    }

    /// Wait for an error broadcast
    pub async fn wait_for_error(&mut self, timeout: Duration) -> Option<String> {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            match tokio::time::timeout(Duration::from_millis(50), self.broadcast_rx.recv()).await {
                Ok(Ok(SseEvent::Error { message })) => return Some(message),
                _ => continue,
            }
        }
        None
    }

    /// Wait for the runtime task to exit
    pub async fn wait_for_exit(&mut self, timeout: Duration) -> bool {
        matches!(
            tokio::time::timeout(timeout, &mut self.runtime_handle).await,
            Ok(Ok(()))
        )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_rx.borrow().clone()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RuntimeManager;

    const WAIT: Duration = Duration::from_secs(2);

    async fn walk_business_branch(rt: &mut TestRuntime) {
        rt.answer_at("name", "João").await;
        rt.answer_at("type", "empresa").await;
        rt.answer_at("businessName", "Padaria Central").await;
        rt.answer_at("businessSegment", "servicos").await;
        rt.answer_at("interest", "campanha").await;
        rt.answer_at("email", "joao@padaria.com.br").await;
        rt.answer_at("phone", "(11) 98765-4321").await;
    }

    #[tokio::test]
    async fn test_mock_persister() {
        let mock = MockPersister::failing();
        let lead = Lead::from_session(
            &Session::new("s-1", "chatbot", "start", Utc::now()),
            Utc::now(),
        );
        assert!(mock.persist(&lead).await.is_err());
        assert_eq!(mock.recorded_leads().len(), 1);
    }

    /// Integration test: full business walk stores exactly one lead
    #[tokio::test]
    async fn test_completes_and_persists_once() {
        let mut rt = TestRuntime::new().build();
        rt.start().await;
        walk_business_branch(&mut rt).await;

        assert!(rt.wait_for_exit(WAIT).await);

        let snapshot = rt.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Completed);
        assert_eq!(snapshot.current_step_id, "final");
        assert!((snapshot.progress - 1.0).abs() < f32::EPSILON);

        let leads = rt.persister.recorded_leads();
        assert_eq!(leads.len(), 1);
        assert_eq!(leads[0].fields["name"], "João");
        assert_eq!(leads[0].fields["userType"], "empresa");
        assert_eq!(leads[0].fields["businessSegment"], "servicos");
        assert!(!leads[0].fields.contains_key("creatorNiche"));

        let types = rt.analytics.event_types();
        assert_eq!(types.first(), Some(&AnalyticsEventType::SessionStart));
        assert_eq!(types.last(), Some(&AnalyticsEventType::FormSubmitted));
        assert!(!types.contains(&AnalyticsEventType::SessionAbandoned));
        assert!(rt.analytics.delivered().iter().all(|b| !b.beacon));
    }

    /// Integration test: unload while the welcome message is "typing"
    #[tokio::test]
    async fn test_unload_mid_typing_cancels_delay() {
        let mut rt = TestRuntime::new()
            .typing_delay(Duration::from_secs(30))
            .build();
        rt.start().await;
        assert!(rt.wait_for_step("start", WAIT).await);

        rt.unload(UnloadReason::PageUnload).await;
        assert!(rt.wait_for_exit(WAIT).await);

        let snapshot = rt.snapshot();
        assert_eq!(snapshot.phase, SessionPhase::Abandoned);
        assert_eq!(snapshot.current_step_id, "start");
        assert!(rt.persister.recorded_leads().is_empty());

        let delivered = rt.analytics.delivered();
        assert_eq!(delivered.len(), 1);
        assert!(delivered[0].beacon);
        assert_eq!(
            rt.analytics.event_types(),
            vec![
                AnalyticsEventType::SessionStart,
                AnalyticsEventType::SessionAbandoned
            ]
        );
    }

    /// Integration test: silent visitor is abandoned after the idle timeout
    #[tokio::test]
    async fn test_idle_timeout_abandons_session() {
        let mut rt = TestRuntime::new()
            .idle_timeout(Duration::from_millis(150))
            .build();
        rt.start().await;
        assert!(rt.wait_for_step("name", WAIT).await);

        assert!(rt.wait_for_exit(WAIT).await);
        assert_eq!(rt.snapshot().phase, SessionPhase::Abandoned);

        let events = rt.analytics.all_events();
        let abandoned = events.last().unwrap();
        assert_eq!(abandoned.event_type, AnalyticsEventType::SessionAbandoned);
        assert_eq!(abandoned.step_id, "name");
        // Nobody left the page, so no beacon
        assert!(rt.analytics.delivered().iter().all(|b| !b.beacon));
    }

    #[tokio::test]
    async fn test_rejected_events_count_as_activity() {
        // Long typing delay keeps the session on the welcome message, where
        // every answer is refused
        let mut rt = TestRuntime::new()
            .typing_delay(Duration::from_secs(30))
            .idle_timeout(Duration::from_millis(200))
            .build();
        rt.start().await;
        assert!(rt.wait_for_step("start", WAIT).await);

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(80)).await;
            rt.send(Event::Answer {
                value: "oi".to_string(),
            })
            .await;
        }
        assert!(rt.wait_for_error(WAIT).await.is_some());
        assert_eq!(rt.snapshot().phase, SessionPhase::InProgress);

        // Once the visitor goes quiet the session is abandoned as usual
        assert!(rt.wait_for_exit(WAIT).await);
        assert_eq!(rt.snapshot().phase, SessionPhase::Abandoned);
    }

    /// Integration test: interval flushes deliver in record order, never twice
    #[tokio::test]
    async fn test_periodic_flush_preserves_order() {
        let mut rt = TestRuntime::new()
            .flush_interval(Duration::from_millis(40))
            .build();
        rt.start().await;
        rt.answer_at("name", "Maria").await;
        assert!(rt.wait_for_step("type", WAIT).await);
        tokio::time::sleep(Duration::from_millis(150)).await;

        let before_unload = rt.analytics.delivered().len();
        assert!(before_unload >= 1, "interval flush never ran");

        rt.unload(UnloadReason::VisibilityHidden).await;
        assert!(rt.wait_for_exit(WAIT).await);

        let events = rt.analytics.all_events();
        let steps: Vec<(AnalyticsEventType, &str)> = events
            .iter()
            .map(|e| (e.event_type, e.step_id.as_str()))
            .collect();
        assert_eq!(
            steps,
            vec![
                (AnalyticsEventType::SessionStart, "start"),
                (AnalyticsEventType::StepCompleted, "start"),
                (AnalyticsEventType::StepCompleted, "name"),
                (AnalyticsEventType::StepCompleted, "greeting"),
                (AnalyticsEventType::SessionAbandoned, "type"),
            ]
        );
        for pair in events.windows(2) {
            assert!(pair[0].created_at <= pair[1].created_at);
        }
        assert!(rt
            .analytics
            .delivered()
            .iter()
            .all(|b| b.session_id == "test-session"));
    }

    /// Integration test: a failing store never blocks completion
    #[tokio::test]
    async fn test_persister_failure_still_completes() {
        let mut rt = TestRuntime::new()
            .graph(presets::contact_flow().unwrap())
            .persister(MockPersister::failing())
            .build();
        rt.start().await;
        rt.answer_at("name", "Ana Souza").await;
        rt.answer_at("email", "ana@exemplo.com").await;
        rt.answer_at("message", "Quero um orçamento").await;

        assert!(rt.wait_for_exit(WAIT).await);
        assert_eq!(rt.snapshot().phase, SessionPhase::Completed);
        assert_eq!(rt.persister.recorded_leads().len(), 1);
        assert!(rt
            .analytics
            .event_types()
            .contains(&AnalyticsEventType::FormSubmitted));
    }

    #[tokio::test]
    async fn test_rejected_answer_reprompts() {
        let mut rt = TestRuntime::new().build();
        rt.start().await;
        rt.answer_at("name", "Jo").await;

        let error = rt
            .wait_for_render(|c| matches!(c, RenderCommand::ShowError { .. }), WAIT)
            .await;
        assert!(error.is_some());

        let snapshot = rt.snapshot();
        assert_eq!(snapshot.current_step_id, "name");
        assert!(snapshot
            .prompt
            .iter()
            .any(|c| matches!(c, RenderCommand::ShowError { .. })));
        assert!(!snapshot.fields.contains_key("name"));
    }

    #[tokio::test]
    async fn test_unknown_option_reports_error() {
        let mut rt = TestRuntime::new().build();
        rt.start().await;
        rt.answer_at("name", "João").await;
        rt.answer_at("type", "agência").await;

        let message = rt.wait_for_error(WAIT).await.unwrap();
        assert!(message.contains("agência"));
        assert_eq!(rt.snapshot().current_step_id, "type");
    }

    #[tokio::test]
    async fn test_manager_reaps_silent_sessions() {
        assert!(RuntimeSettings::default().idle_timeout.is_some());

        let analytics = Arc::new(MockAnalyticsSink::new());
        let manager = RuntimeManager::new(
            EngineContext::new(
                Arc::new(presets::lead_flow().unwrap()),
                EngineConfig {
                    typing_delay: Duration::from_millis(10),
                    ..EngineConfig::default()
                },
            ),
            RuntimeSettings {
                idle_timeout: Some(Duration::from_millis(100)),
                typing_jitter: Duration::ZERO,
                ..RuntimeSettings::default()
            },
            "chatbot",
            Arc::new(MockPersister::new()),
            analytics.clone(),
        );

        // No answer and no unload ever arrive
        let id = manager.create_session(None).await.unwrap();
        assert_eq!(manager.active_count().await, 1);

        let deadline = tokio::time::Instant::now() + WAIT;
        while manager.active_count().await > 0 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.active_count().await, 0);
        assert!(manager.get(&id).await.is_err());

        let abandoned = analytics
            .all_events()
            .into_iter()
            .filter(|e| e.event_type == AnalyticsEventType::SessionAbandoned)
            .count();
        assert_eq!(abandoned, 1);
    }

    #[tokio::test]
    async fn test_manager_routes_and_cleans_up() {
        let persister = Arc::new(MockPersister::new());
        let analytics = Arc::new(MockAnalyticsSink::new());
        let context = EngineContext::new(
            Arc::new(presets::lead_flow().unwrap()),
            EngineConfig {
                typing_delay: Duration::from_millis(10),
                ..EngineConfig::default()
            },
        );
        let manager = RuntimeManager::new(
            context,
            RuntimeSettings {
                typing_jitter: Duration::ZERO,
                ..RuntimeSettings::default()
            },
            "chatbot",
            persister.clone(),
            analytics.clone(),
        );

        let first = manager.create_session(None).await.unwrap();
        let second = manager
            .create_session(Some("landing".to_string()))
            .await
            .unwrap();
        assert_ne!(first, second);
        assert_eq!(manager.active_count().await, 2);
        assert_eq!(manager.snapshot(&second).await.unwrap().source, "landing");

        assert!(manager.unload(&first, UnloadReason::PageUnload).await);
        assert!(!manager.unload("missing", UnloadReason::PageUnload).await);

        let deadline = tokio::time::Instant::now() + WAIT;
        while manager.active_count().await > 1 && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(manager.active_count().await, 1);
        assert!(manager.get(&first).await.is_err());

        manager.shutdown_all().await;
        assert_eq!(manager.active_count().await, 0);

        let abandoned: Vec<String> = analytics
            .all_events()
            .into_iter()
            .filter(|e| e.event_type == AnalyticsEventType::SessionAbandoned)
            .map(|e| e.session_id)
            .collect();
        assert_eq!(abandoned.len(), 2);
        assert!(abandoned.contains(&first));
        assert!(abandoned.contains(&second));
        assert!(persister.recorded_leads().is_empty());
    }
}
