//! Conversation flow definition
//!
//! A flow is a directed, acyclic graph of steps walked forward from a single
//! start step until a terminal message is reached.

mod graph;
pub mod presets;
mod step;
mod validate;


pub use graph::{FlowDefinition, GraphError, StepGraph};
pub use step::{Content, Fields, OptionItem, OptionsSource, Step, StepKind, Transition};
pub use validate::Validator;
