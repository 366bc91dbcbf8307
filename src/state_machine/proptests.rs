//! Property-based tests for the session state machine
//!
//! These tests drive the lead flow with arbitrary event sequences and check
//! the invariants that must hold whatever the visitor does.

use super::*;
use crate::analytics::{replay, AnalyticsEvent, AnalyticsEventType};
use crate::flow::{presets, StepKind};
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use proptest::prelude::*;
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

fn test_context(record_validation_failures: bool) -> EngineContext {
    let graph = presets::lead_flow().expect("lead flow is valid");
    EngineContext::new(
        Arc::new(graph),
        EngineConfig {
            record_validation_failures,
            ..EngineConfig::default()
        },
    )
}

fn epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0).unwrap()
}

/// Visitor/timer actions. Typing timers are resolved against the session at
/// the moment they fire, which the strategy cannot know up front.
#[derive(Debug, Clone)]
enum Action {
    Start,
    TypingForCurrent,
    TypingForOther(String),
    Answer(String),
    Unload(UnloadReason),
}

impl Action {
    fn into_event(self, session: &Session) -> Event {
        match self {
            Action::Start => Event::Start,
            Action::TypingForCurrent => Event::TypingElapsed {
                step_id: session.current_step_id.clone(),
            },
            Action::TypingForOther(step_id) => Event::TypingElapsed { step_id },
            Action::Answer(value) => Event::Answer { value },
            Action::Unload(reason) => Event::Unload { reason },
        }
    }
}

/// Everything a run produced
struct Run {
    sessions: Vec<Session>,
    effects: Vec<Effect>,
    final_session: Session,
}

impl Run {
    fn recorded(&self) -> Vec<AnalyticsEvent> {
        self.effects
            .iter()
            .filter_map(|e| match e {
                Effect::Record(event) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn count(&self, kind: AnalyticsEventType) -> usize {
        self.recorded()
            .iter()
            .filter(|e| e.event_type == kind)
            .count()
    }

    fn persisted(&self) -> usize {
        self.effects
            .iter()
            .filter(|e| matches!(e, Effect::PersistLead(_)))
            .count()
    }
}

fn drive(ctx: &EngineContext, actions: Vec<Action>) -> Run {
    let mut clock = epoch();
    let mut session = Session::new("prop-session", "chatbot", ctx.graph.start_id(), clock);
    let mut sessions = vec![session.clone()];
    let mut effects = Vec::new();

    for action in actions {
        clock += ChronoDuration::milliseconds(750);
        let event = action.into_event(&session);
        if let Ok(result) = transition(&session, ctx, event, clock) {
            session = result.new_session;
            effects.extend(result.effects);
            sessions.push(session.clone());
        }
    }

    Run {
        sessions,
        effects,
        final_session: session,
    }
}

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_reason() -> impl Strategy<Value = UnloadReason> {
    prop_oneof![
        Just(UnloadReason::VisibilityHidden),
        Just(UnloadReason::PageUnload),
        Just(UnloadReason::IdleTimeout),
        Just(UnloadReason::Shutdown),
    ]
}

/// Answers that fit some step of the lead flow, plus junk
fn arb_answer() -> impl Strategy<Value = String> {
    prop_oneof![
        4 => prop::sample::select(vec![
            "João Pedro",
            "Maria",
            "empresa",
            "criador",
            "Sou uma empresa",
            "Padaria Central",
            "alimentacao",
            "moda",
            "10k_100k",
            "instagram.com/maria",
            "campanha",
            "parcerias",
            "contato",
            "maria@exemplo.com.br",
            "(11) 98765-4321",
        ])
        .prop_map(str::to_string),
        1 => prop::sample::select(vec!["", "  ", "Jo", "x", "não sei", "@@"]).prop_map(str::to_string),
        1 => "[a-zA-Z0-9 @.]{0,24}",
    ]
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop_oneof![
        1 => Just(Action::Start),
        4 => Just(Action::TypingForCurrent),
        1 => prop::sample::select(vec!["start", "greeting", "final", "name"])
            .prop_map(|id| Action::TypingForOther(id.to_string())),
        8 => arb_answer().prop_map(Action::Answer),
        1 => arb_reason().prop_map(Action::Unload),
    ]
}

/// Sequences that start the session first, so most runs get somewhere
fn arb_actions() -> impl Strategy<Value = Vec<Action>> {
    proptest::collection::vec(arb_action(), 0..60).prop_map(|mut actions| {
        actions.insert(0, Action::Start);
        actions
    })
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    // Invariant 1: once terminal, the phase never changes
    #[test]
    fn prop_terminal_phase_is_final(actions in arb_actions()) {
        let run = drive(&test_context(false), actions);
        let first_terminal = run.sessions.iter().position(Session::is_closed);
        if let Some(index) = first_terminal {
            let phase = run.sessions[index].phase;
            for later in &run.sessions[index..] {
                prop_assert_eq!(later.phase, phase);
                prop_assert_eq!(later, &run.sessions[index]);
            }
        }
    }

    // Invariant 2: completion and abandonment are exclusive and happen once
    #[test]
    fn prop_outcome_recorded_exactly_once(actions in arb_actions()) {
        let run = drive(&test_context(false), actions);
        let submitted = run.count(AnalyticsEventType::FormSubmitted);
        let abandoned = run.count(AnalyticsEventType::SessionAbandoned);

        prop_assert!(submitted <= 1);
        prop_assert!(abandoned <= 1);
        prop_assert!(submitted + abandoned <= 1);
        prop_assert_eq!(run.persisted(), submitted);
        prop_assert_eq!(submitted == 1, run.final_session.completed());
        prop_assert_eq!(abandoned == 1, run.final_session.abandoned());
    }

    // Invariant 3: rejected input never changes the session
    #[test]
    fn prop_rejected_input_leaves_session_unchanged(
        actions in arb_actions(),
        junk in prop::sample::select(vec!["", "   ", "J", "a@", "12-34"]),
    ) {
        let ctx = test_context(true);
        let run = drive(&ctx, actions);
        let session = run.final_session;
        let step = ctx.graph.step(&session.current_step_id).unwrap();

        if session.phase == SessionPhase::InProgress && step.kind == StepKind::Input {
            let accepted = step.validator.as_ref().map_or(!junk.trim().is_empty(), |v| v.validate(junk));
            if !accepted {
                let result = transition(&session, &ctx, Event::Answer { value: junk.to_string() }, Utc::now()).unwrap();
                prop_assert_eq!(&result.new_session, &session);
                let advanced = result.effects.iter().any(|e| matches!(
                    e,
                    Effect::PersistLead(_) | Effect::Record(AnalyticsEvent { event_type: AnalyticsEventType::StepCompleted, .. })
                ));
                prop_assert!(!advanced, "rejected answer {:?} advanced the session", junk);
            }
        }
    }

    // Invariant 4: counters and timestamps only move forward
    #[test]
    fn prop_step_counter_is_monotonic(actions in arb_actions()) {
        let run = drive(&test_context(false), actions);
        for pair in run.sessions.windows(2) {
            prop_assert!(pair[1].step_number >= pair[0].step_number);
        }
        let recorded = run.recorded();
        for pair in recorded.windows(2) {
            prop_assert!(pair[1].created_at >= pair[0].created_at);
            prop_assert!(pair[1].session_duration_ms >= pair[0].session_duration_ms);
        }
        for event in &recorded {
            prop_assert_eq!(&event.session_id, "prop-session");
        }
    }

    // Invariant 5: the event stream alone is enough to rebuild progress
    #[test]
    fn prop_replay_matches_session(actions in arb_actions()) {
        let ctx = test_context(true);
        let run = drive(&ctx, actions);
        let replayed = replay(&ctx.graph, &run.recorded()).unwrap();

        prop_assert_eq!(&replayed.fields, &run.final_session.fields);
        prop_assert_eq!(replayed.phase, run.final_session.phase);
        if run.final_session.phase != SessionPhase::Init {
            prop_assert_eq!(
                replayed.current_step_id.as_deref(),
                Some(run.final_session.current_step_id.as_str())
            );
        }
    }

    // Invariant 6: a completed lead holds only answers from the path taken
    #[test]
    fn prop_lead_fields_follow_branch(actions in arb_actions()) {
        let run = drive(&test_context(false), actions);
        for effect in &run.effects {
            if let Effect::PersistLead(lead) = effect {
                let business = lead.fields.contains_key("businessName");
                let creator = lead.fields.contains_key("creatorNiche");
                prop_assert!(business != creator);
                prop_assert_eq!(lead.user_type.as_deref(), lead.fields.get("userType").map(String::as_str));
            }
        }
    }
}
