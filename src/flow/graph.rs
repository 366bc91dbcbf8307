//! Validated step graph
//!
//! A `StepGraph` can only be built through `StepGraph::new`, which rejects
//! misconfigured flows up front. Once built, every lookup the engine performs
//! for a validated answer is guaranteed to succeed.

use super::step::{Fields, OptionItem, OptionsSource, Step, StepKind, Transition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Flow configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error("Flow has no steps")]
    Empty,
    #[error("Duplicate step id: {0}")]
    DuplicateStep(String),
    #[error("Start step not found: {0}")]
    MissingStart(String),
    #[error("Unknown step: {0}")]
    UnknownStep(String),
    #[error("Step {from} points to unknown step {to}")]
    UnknownTarget { from: String, to: String },
    #[error("Step {0} collects an answer but has no field")]
    MissingField(String),
    #[error("Options step {0} has no options")]
    MissingOptions(String),
    #[error("Step {0} collects an answer and cannot be terminal")]
    TerminalAnswerStep(String),
    #[error("Message step {0} cannot branch on a value")]
    BranchWithoutValue(String),
    #[error("Input step {0} branches on free text without a default")]
    BranchWithoutDefault(String),
    #[error("Step {step} has no branch for value {value:?}")]
    UnmappedBranch { step: String, value: String },
    #[error("Step {step} has an invalid validation pattern: {reason}")]
    InvalidPattern { step: String, reason: String },
    #[error("Step {0} has no way forward")]
    NoExit(String),
    #[error("Cycle detected through step {0}")]
    Cycle(String),
    #[error("Invalid flow definition: {0}")]
    Json(String),
}

/// Serialized form of a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDefinition {
    pub start: String,
    pub steps: Vec<Step>,
}

/// Immutable, validated conversation graph
#[derive(Debug, Clone)]
pub struct StepGraph {
    start: String,
    steps: Vec<Step>,
    index: HashMap<String, usize>,
}

impl StepGraph {
    pub fn new(start: impl Into<String>, steps: Vec<Step>) -> Result<Self, GraphError> {
        let start = start.into();
        if steps.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut index = HashMap::with_capacity(steps.len());
        for (i, step) in steps.iter().enumerate() {
            if index.insert(step.id.clone(), i).is_some() {
                return Err(GraphError::DuplicateStep(step.id.clone()));
            }
        }
        if !index.contains_key(&start) {
            return Err(GraphError::MissingStart(start));
        }

        let graph = Self {
            start,
            steps,
            index,
        };
        for step in &graph.steps {
            graph.check_step(step)?;
        }
        graph.check_acyclic()?;
        Ok(graph)
    }

    pub fn from_definition(definition: FlowDefinition) -> Result<Self, GraphError> {
        Self::new(definition.start, definition.steps)
    }

    pub fn from_json(json: &str) -> Result<Self, GraphError> {
        let definition: FlowDefinition =
            serde_json::from_str(json).map_err(|e| GraphError::Json(e.to_string()))?;
        Self::from_definition(definition)
    }

    pub fn to_definition(&self) -> FlowDefinition {
        FlowDefinition {
            start: self.start.clone(),
            steps: self.steps.clone(),
        }
    }

    pub fn start_id(&self) -> &str {
        &self.start
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn get(&self, id: &str) -> Option<&Step> {
        self.index.get(id).map(|&i| &self.steps[i])
    }

    pub fn step(&self, id: &str) -> Result<&Step, GraphError> {
        self.get(id)
            .ok_or_else(|| GraphError::UnknownStep(id.to_string()))
    }

    /// Resolve the step that follows `step` once `value` has been accepted.
    ///
    /// Returns `Ok(None)` for a terminal step. A branch with no entry for
    /// `value` and no default is a configuration error; construction rejects
    /// it for options steps, so it can only surface for free-text branches.
    pub fn resolve_next(&self, step: &Step, value: &str) -> Result<Option<&str>, GraphError> {
        let target = match &step.next {
            Transition::Terminal => return Ok(None),
            Transition::Fixed { target } => target,
            Transition::Branch { table, default } => table
                .get(value)
                .or(default.as_ref())
                .ok_or_else(|| GraphError::UnmappedBranch {
                    step: step.id.clone(),
                    value: value.to_string(),
                })?,
        };
        self.step(target).map(|next| Some(next.id.as_str()))
    }

    /// Bot wording for `step` with collected answers filled in
    pub fn render_content(&self, step: &Step, fields: &Fields) -> String {
        step.content.render(fields)
    }

    /// Options currently offered by `step` given the collected answers
    pub fn options_for<'a>(&self, step: &'a Step, fields: &Fields) -> &'a [OptionItem] {
        step.options
            .as_ref()
            .map(|source| source.resolve(fields))
            .unwrap_or_default()
    }

    /// UI progress for `step_id`: declaration index over `len - 1`, in `[0, 1]`
    #[allow(clippy::cast_precision_loss)] // step counts are tiny
    pub fn progress(&self, step_id: &str) -> f32 {
        let Some(&index) = self.index.get(step_id) else {
            return 0.0;
        };
        if self.steps.len() <= 1 {
            return 1.0;
        }
        (index as f32 / (self.steps.len() - 1) as f32).clamp(0.0, 1.0)
    }

    fn check_step(&self, step: &Step) -> Result<(), GraphError> {
        if step.collects_answer() {
            if step.field.as_deref().map_or(true, str::is_empty) {
                return Err(GraphError::MissingField(step.id.clone()));
            }
            if step.is_terminal() {
                return Err(GraphError::TerminalAnswerStep(step.id.clone()));
            }
        }

        if step.kind == StepKind::Message && matches!(step.next, Transition::Branch { .. }) {
            return Err(GraphError::BranchWithoutValue(step.id.clone()));
        }

        if let Some(validator) = &step.validator {
            validator
                .check()
                .map_err(|reason| GraphError::InvalidPattern {
                    step: step.id.clone(),
                    reason,
                })?;
        }

        let targets = step.next.targets();
        if !step.is_terminal() && targets.is_empty() {
            return Err(GraphError::NoExit(step.id.clone()));
        }
        for target in targets {
            if !self.index.contains_key(target) {
                return Err(GraphError::UnknownTarget {
                    from: step.id.clone(),
                    to: target.to_string(),
                });
            }
        }

        // Free text can't be enumerated, so every input branch needs a default
        if step.kind == StepKind::Input
            && matches!(step.next, Transition::Branch { default: None, .. })
        {
            return Err(GraphError::BranchWithoutDefault(step.id.clone()));
        }

        if step.kind == StepKind::Options {
            let source = step
                .options
                .as_ref()
                .ok_or_else(|| GraphError::MissingOptions(step.id.clone()))?;
            // Every collected value must still leave something to pick
            if let OptionsSource::ByField {
                table, fallback, ..
            } = source
            {
                if fallback.is_empty() || table.values().any(Vec::is_empty) {
                    return Err(GraphError::MissingOptions(step.id.clone()));
                }
            }
            let items = source.all_items();
            if items.is_empty() {
                return Err(GraphError::MissingOptions(step.id.clone()));
            }
            if let Transition::Branch {
                table,
                default: None,
            } = &step.next
            {
                if let Some(item) = items.iter().find(|item| !table.contains_key(&item.value)) {
                    return Err(GraphError::UnmappedBranch {
                        step: step.id.clone(),
                        value: item.value.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Depth-first walk from the start step; any back edge is a cycle.
    /// Together with the per-step checks this guarantees every path from the
    /// start reaches a terminal step in fewer than `len()` hops.
    fn check_acyclic(&self) -> Result<(), GraphError> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            InProgress,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.steps.len()];
        // Explicit stack of (step index, next target position)
        let mut stack: Vec<(usize, usize)> = vec![(self.index[&self.start], 0)];
        marks[self.index[&self.start]] = Mark::InProgress;

        while let Some(frame) = stack.last_mut() {
            let (current, cursor) = *frame;
            frame.1 += 1;
            match self.steps[current].next.targets().get(cursor) {
                Some(target) => {
                    let next = self.index[*target];
                    match marks[next] {
                        Mark::InProgress => {
                            return Err(GraphError::Cycle(self.steps[next].id.clone()));
                        }
                        Mark::Unvisited => {
                            marks[next] = Mark::InProgress;
                            stack.push((next, 0));
                        }
                        Mark::Done => {}
                    }
                }
                None => {
                    marks[current] = Mark::Done;
                    stack.pop();
                }
            }
        }
        Ok(())
    }
}

impl Serialize for StepGraph {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_definition().serialize(serializer)
    }
}
