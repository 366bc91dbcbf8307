//! Pure state transition function
//!
//! Given the same session, context, event and clock reading, `transition`
//! always returns the same new session and effects. Time is passed in so
//! durations stay deterministic under test.

use super::state::{EngineContext, Lead, Session, SessionPhase};
use super::{Effect, Event, RenderCommand, UnloadReason};
use crate::analytics::{AnalyticsEvent, AnalyticsEventType, FlushTransport};
use crate::flow::{GraphError, Step, StepKind};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result of a state transition
#[derive(Debug)]
pub struct TransitionResult {
    pub new_session: Session,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    pub fn new(session: Session) -> Self {
        Self {
            new_session: session,
            effects: vec![],
        }
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = Effect>) -> Self {
        self.effects.extend(effects);
        self
    }
}

/// Errors that can occur during transition
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Session has not started")]
    NotStarted,
    #[error("Session already started")]
    AlreadyStarted,
    #[error("Session is closed ({0:?})")]
    SessionClosed(SessionPhase),
    #[error("Step {0} is not waiting for input")]
    NotAwaitingInput(String),
    #[error("{value:?} is not an option of step {step_id}")]
    UnknownOption { step_id: String, value: String },
    #[error(transparent)]
    Graph(#[from] GraphError),
}

/// Pure transition function
pub fn transition(
    session: &Session,
    ctx: &EngineContext,
    event: Event,
    now: DateTime<Utc>,
) -> Result<TransitionResult, TransitionError> {
    match (session.phase, event) {
        (SessionPhase::Init, Event::Start) => start(session, ctx, now),

        (SessionPhase::Init | SessionPhase::InProgress, Event::Unload { reason }) => {
            Ok(abandon(session, reason, now))
        }

        (SessionPhase::Init, _) => Err(TransitionError::NotStarted),

        (SessionPhase::InProgress, Event::Start) => Err(TransitionError::AlreadyStarted),

        (SessionPhase::InProgress, Event::TypingElapsed { step_id }) => {
            typing_elapsed(session, ctx, &step_id, now)
        }

        (SessionPhase::InProgress, Event::Answer { value }) => answer(session, ctx, &value, now),

        // Closed sessions are never mutated again. Repeated teardown signals
        // and timers that fire late are silently absorbed.
        (
            SessionPhase::Completed | SessionPhase::Abandoned,
            Event::Unload { .. } | Event::TypingElapsed { .. },
        ) => Ok(TransitionResult::new(session.clone())),

        (phase @ (SessionPhase::Completed | SessionPhase::Abandoned), _) => {
            Err(TransitionError::SessionClosed(phase))
        }
    }
}

/// Completion handler for a session sitting on a terminal step.
///
/// Idempotent: a session that is already closed gets no effects, so the lead
/// is persisted and `form_submitted` recorded at most once.
pub fn complete(session: &Session, now: DateTime<Utc>) -> TransitionResult {
    let mut next = session.clone();
    let effects = finish(&mut next, now);
    TransitionResult::new(next).with_effects(effects)
}

// ============================================================================
// Handlers
// ============================================================================

fn start(
    session: &Session,
    ctx: &EngineContext,
    now: DateTime<Utc>,
) -> Result<TransitionResult, TransitionError> {
    let mut next = session.clone();
    next.phase = SessionPhase::InProgress;
    next.started_at = now;
    next.step_started_at = now;
    next.step_number = 1;
    next.current_step_id = ctx.graph.start_id().to_string();

    let mut effects = vec![Effect::Record(AnalyticsEvent::for_session(
        AnalyticsEventType::SessionStart,
        &next,
        now,
    ))];
    effects.extend(enter_step(&mut next, ctx, ctx.graph.start_id(), now)?);

    tracing::debug!(session_id = %next.session_id, "Session started");
    Ok(TransitionResult::new(next).with_effects(effects))
}

fn typing_elapsed(
    session: &Session,
    ctx: &EngineContext,
    step_id: &str,
    now: DateTime<Utc>,
) -> Result<TransitionResult, TransitionError> {
    // A timer for a step we already left
    if step_id != session.current_step_id {
        return Ok(TransitionResult::new(session.clone()));
    }
    let step = ctx.graph.step(step_id)?;
    if step.kind != StepKind::Message {
        return Ok(TransitionResult::new(session.clone()));
    }

    let mut next = session.clone();
    let Some(target) = ctx.graph.resolve_next(step, "")? else {
        let effects = finish(&mut next, now);
        return Ok(TransitionResult::new(next).with_effects(effects));
    };

    let mut effects = vec![Effect::Record(AnalyticsEvent::for_session(
        AnalyticsEventType::StepCompleted,
        session,
        now,
    ))];
    next.step_number += 1;
    effects.extend(enter_step(&mut next, ctx, target, now)?);
    Ok(TransitionResult::new(next).with_effects(effects))
}

fn answer(
    session: &Session,
    ctx: &EngineContext,
    raw: &str,
    now: DateTime<Utc>,
) -> Result<TransitionResult, TransitionError> {
    let step = ctx.graph.step(&session.current_step_id)?;

    let value = match step.kind {
        StepKind::Message => return Err(TransitionError::NotAwaitingInput(step.id.clone())),
        StepKind::Input => {
            let value = raw.trim();
            let accepted = step
                .validator
                .as_ref()
                .map_or(!value.is_empty(), |validator| validator.validate(value));
            if !accepted {
                return Ok(reject(session, ctx, step, value, now));
            }
            value.to_string()
        }
        StepKind::Options => choose_option(session, ctx, step, raw)?,
    };

    let field = step
        .field
        .as_deref()
        .ok_or_else(|| GraphError::MissingField(step.id.clone()))?;

    let mut next = session.clone();
    next.fields.insert(field.to_string(), value.clone());
    if field == ctx.config.user_type_field {
        next.user_type = Some(value.clone());
    }

    // Branch on the value just written, never on an older answer
    let target = ctx
        .graph
        .resolve_next(step, &value)?
        .ok_or_else(|| GraphError::TerminalAnswerStep(step.id.clone()))?;

    let mut effects = vec![Effect::Record(
        AnalyticsEvent::for_session(AnalyticsEventType::StepCompleted, &next, now)
            .with_value(value),
    )];
    next.step_number += 1;
    effects.extend(enter_step(&mut next, ctx, target, now)?);
    Ok(TransitionResult::new(next).with_effects(effects))
}

/// Map a submitted choice to its option value. The value itself or the
/// label (case-insensitive) are accepted.
fn choose_option(
    session: &Session,
    ctx: &EngineContext,
    step: &Step,
    raw: &str,
) -> Result<String, TransitionError> {
    let wanted = raw.trim();
    let options = ctx.graph.options_for(step, &session.fields);
    options
        .iter()
        .find(|option| option.value == wanted)
        .or_else(|| {
            let wanted = wanted.to_lowercase();
            options
                .iter()
                .find(|option| option.label.to_lowercase() == wanted)
        })
        .map(|option| option.value.clone())
        .ok_or_else(|| TransitionError::UnknownOption {
            step_id: step.id.clone(),
            value: wanted.to_string(),
        })
}

/// Re-prompt in place. The session is returned unchanged.
fn reject(
    session: &Session,
    ctx: &EngineContext,
    step: &Step,
    value: &str,
    now: DateTime<Utc>,
) -> TransitionResult {
    let mut result = TransitionResult::new(session.clone())
        .with_effect(Effect::show_error(&step.id, step.error_message()))
        .with_effect(Effect::await_input(&step.id));

    if ctx.config.record_validation_failures {
        result = result.with_effect(Effect::Record(
            AnalyticsEvent::for_session(AnalyticsEventType::ValidationFailed, session, now)
                .with_value(value),
        ));
    }
    result
}

fn abandon(session: &Session, reason: UnloadReason, now: DateTime<Utc>) -> TransitionResult {
    let mut next = session.clone();
    next.phase = SessionPhase::Abandoned;

    let transport = if reason.is_page_exit() {
        FlushTransport::Beacon
    } else {
        FlushTransport::Regular
    };

    tracing::debug!(
        session_id = %session.session_id,
        step_id = %session.current_step_id,
        reason = ?reason,
        "Session abandoned"
    );

    TransitionResult::new(next)
        .with_effect(Effect::CancelPending)
        .with_effect(Effect::Record(AnalyticsEvent::for_session(
            AnalyticsEventType::SessionAbandoned,
            session,
            now,
        )))
        .with_effect(Effect::FlushAnalytics { transport })
        .with_effect(Effect::closed(SessionPhase::Abandoned))
        .with_effect(Effect::SessionEnded)
}

// ============================================================================
// Helpers
// ============================================================================

/// Make `step_id` current and emit what the renderer needs for it
fn enter_step(
    session: &mut Session,
    ctx: &EngineContext,
    step_id: &str,
    now: DateTime<Utc>,
) -> Result<Vec<Effect>, TransitionError> {
    let step = ctx.graph.step(step_id)?;
    session.current_step_id.clone_from(&step.id);
    session.step_started_at = now;

    let mut effects = vec![Effect::show_message(
        &step.id,
        ctx.graph.render_content(step, &session.fields),
        ctx.graph.progress(&step.id),
    )];

    match step.kind {
        StepKind::Message if step.is_terminal() => effects.extend(finish(session, now)),
        StepKind::Message => effects.push(Effect::ScheduleTyping {
            step_id: step.id.clone(),
            delay: ctx.config.typing_delay,
        }),
        StepKind::Input => effects.push(Effect::await_input(&step.id)),
        StepKind::Options => effects.push(Effect::Render(RenderCommand::ShowOptions {
            step_id: step.id.clone(),
            options: ctx.graph.options_for(step, &session.fields).to_vec(),
        })),
    }

    Ok(effects)
}

fn finish(session: &mut Session, now: DateTime<Utc>) -> Vec<Effect> {
    if session.is_closed() {
        return Vec::new();
    }
    session.phase = SessionPhase::Completed;

    tracing::debug!(session_id = %session.session_id, "Session completed");

    vec![
        Effect::PersistLead(Lead::from_session(session, now)),
        Effect::Record(AnalyticsEvent::for_session(
            AnalyticsEventType::FormSubmitted,
            session,
            now,
        )),
        Effect::FlushAnalytics {
            transport: FlushTransport::Regular,
        },
        Effect::closed(SessionPhase::Completed),
        Effect::SessionEnded,
    ]
}
