//! Rebuild session progress from its event stream

use super::{AnalyticsEvent, AnalyticsEventType};
use crate::flow::{Fields, GraphError, StepGraph};
use crate::state_machine::SessionPhase;
use serde::Serialize;

/// Session progress reconstructed from events
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Replayed {
    pub fields: Fields,
    pub current_step_id: Option<String>,
    pub phase: SessionPhase,
}

/// Replay one session's events in record order.
///
/// Each `step_completed` writes its value under the step's field and moves
/// to the step the graph resolves for that value.
pub fn replay(graph: &StepGraph, events: &[AnalyticsEvent]) -> Result<Replayed, GraphError> {
    let mut state = Replayed::default();

    for event in events {
        match event.event_type {
            AnalyticsEventType::SessionStart => {
                state.phase = SessionPhase::InProgress;
                state.current_step_id = Some(event.step_id.clone());
            }
            AnalyticsEventType::StepCompleted => {
                let step = graph.step(&event.step_id)?;
                let value = event.step_value.as_deref().unwrap_or_default();
                if let (Some(field), Some(value)) = (&step.field, &event.step_value) {
                    state.fields.insert(field.clone(), value.clone());
                }
                state.current_step_id = graph.resolve_next(step, value)?.map(str::to_string);
            }
            AnalyticsEventType::FormSubmitted => {
                state.phase = SessionPhase::Completed;
                state.current_step_id = Some(event.step_id.clone());
            }
            AnalyticsEventType::SessionAbandoned => {
                state.phase = SessionPhase::Abandoned;
                state.current_step_id = Some(event.step_id.clone());
            }
            AnalyticsEventType::ValidationFailed => {}
        }
    }

    Ok(state)
}
