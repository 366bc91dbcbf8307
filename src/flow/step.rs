//! Step definitions
//!
//! Steps are pure data: wording, option lists and transitions that depend on
//! collected answers are expressed as templates and lookup tables rather than
//! closures, so a whole flow can be serialized and validated up front.

use super::validate::Validator;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Answers collected so far, keyed by step field name
pub type Fields = BTreeMap<String, String>;

/// What a step does when it becomes current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Bot speaks, then auto-advances after the typing delay
    Message,
    /// Free text, checked by the step's validator
    Input,
    /// One choice out of a finite option list
    Options,
}

/// Bot wording for a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "text", rename_all = "snake_case")]
pub enum Content {
    Static(String),
    /// `{field}` placeholders are replaced with collected answers.
    /// `{field|first}` keeps only the first word (first names).
    Template(String),
}

impl Content {
    pub fn template(text: impl Into<String>) -> Self {
        Content::Template(text.into())
    }

    pub fn render(&self, fields: &Fields) -> String {
        match self {
            Content::Static(text) => text.clone(),
            Content::Template(template) => interpolate(template, fields),
        }
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Content::Static(text.to_string())
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Content::Static(text)
    }
}

fn interpolate(template: &str, fields: &Fields) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some((before, after)) = rest.split_once('{') {
        out.push_str(before);
        let Some((placeholder, tail)) = after.split_once('}') else {
            // Unclosed brace: keep the remainder verbatim
            out.push('{');
            out.push_str(after);
            return out;
        };
        let (key, modifier) = match placeholder.split_once('|') {
            Some((key, modifier)) => (key.trim(), Some(modifier.trim())),
            None => (placeholder.trim(), None),
        };
        if let Some(value) = fields.get(key) {
            match modifier {
                Some("first") => out.push_str(value.split_whitespace().next().unwrap_or("")),
                _ => out.push_str(value),
            }
        }
        rest = tail;
    }

    out.push_str(rest);
    out
}

/// A selectable answer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionItem {
    pub label: String,
    pub value: String,
}

impl OptionItem {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }
}

/// Where an options step gets its choices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptionsSource {
    Static { items: Vec<OptionItem> },
    /// Choices picked by the value previously collected for `field`
    ByField {
        field: String,
        table: BTreeMap<String, Vec<OptionItem>>,
        #[serde(default)]
        fallback: Vec<OptionItem>,
    },
}

impl OptionsSource {
    pub fn resolve(&self, fields: &Fields) -> &[OptionItem] {
        match self {
            OptionsSource::Static { items } => items,
            OptionsSource::ByField {
                field,
                table,
                fallback,
            } => fields
                .get(field)
                .and_then(|value| table.get(value))
                .map_or(fallback.as_slice(), Vec::as_slice),
        }
    }

    /// Every option this source can ever offer, used for graph checks
    pub fn all_items(&self) -> Vec<&OptionItem> {
        match self {
            OptionsSource::Static { items } => items.iter().collect(),
            OptionsSource::ByField {
                table, fallback, ..
            } => table.values().flatten().chain(fallback.iter()).collect(),
        }
    }
}

/// Outgoing edge(s) of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Transition {
    Fixed {
        target: String,
    },
    /// Target chosen by the value just submitted for this step
    Branch {
        table: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        default: Option<String>,
    },
    /// Graph sink: reaching it completes the session
    Terminal,
}

impl Transition {
    /// All step ids this transition can lead to
    pub fn targets(&self) -> Vec<&str> {
        match self {
            Transition::Fixed { target } => vec![target.as_str()],
            Transition::Branch { table, default } => table
                .values()
                .chain(default.iter())
                .map(String::as_str)
                .collect(),
            Transition::Terminal => vec![],
        }
    }
}

/// Immutable node of the conversation graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub kind: StepKind,
    pub content: Content,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<OptionsSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validator: Option<Validator>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub next: Transition,
}

/// Re-prompt used when an input step has no explicit error message
pub const DEFAULT_ERROR_MESSAGE: &str = "Não entendi sua resposta. Pode tentar de novo?";

impl Step {
    fn base(id: impl Into<String>, kind: StepKind, content: impl Into<Content>) -> Self {
        Self {
            id: id.into(),
            kind,
            content: content.into(),
            field: None,
            options: None,
            validator: None,
            error_message: None,
            next: Transition::Terminal,
        }
    }

    /// Bot message; terminal until `then` is called
    pub fn message(id: impl Into<String>, content: impl Into<Content>) -> Self {
        Self::base(id, StepKind::Message, content)
    }

    pub fn input(
        id: impl Into<String>,
        field: impl Into<String>,
        content: impl Into<Content>,
    ) -> Self {
        let mut step = Self::base(id, StepKind::Input, content);
        step.field = Some(field.into());
        step
    }

    pub fn options(
        id: impl Into<String>,
        field: impl Into<String>,
        content: impl Into<Content>,
        items: Vec<OptionItem>,
    ) -> Self {
        let mut step = Self::base(id, StepKind::Options, content);
        step.field = Some(field.into());
        step.options = Some(OptionsSource::Static { items });
        step
    }

    pub fn with_options(mut self, source: OptionsSource) -> Self {
        self.options = Some(source);
        self
    }

    pub fn validate(mut self, validator: Validator, error_message: impl Into<String>) -> Self {
        self.validator = Some(validator);
        self.error_message = Some(error_message.into());
        self
    }

    pub fn then(mut self, target: impl Into<String>) -> Self {
        self.next = Transition::Fixed {
            target: target.into(),
        };
        self
    }

    pub fn branch<K, V>(mut self, table: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.next = Transition::Branch {
            table: table
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            default: None,
        };
        self
    }

    /// Default target for a branch; turns any other transition into `Fixed`
    pub fn otherwise(mut self, target: impl Into<String>) -> Self {
        let target = target.into();
        if let Transition::Branch { default, .. } = &mut self.next {
            *default = Some(target);
        } else {
            self.next = Transition::Fixed { target };
        }
        self
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.next, Transition::Terminal)
    }

    pub fn collects_answer(&self) -> bool {
        matches!(self.kind, StepKind::Input | StepKind::Options)
    }

    pub fn error_message(&self) -> &str {
        self.error_message.as_deref().unwrap_or(DEFAULT_ERROR_MESSAGE)
    }
}
