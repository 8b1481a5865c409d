// src/store/model.rs

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    New,
    Active,
    Paused,
    Done,
    Cancelled,
}

impl TaskState {
    /// Terminal states: the task will never run (again).
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Done | TaskState::Cancelled)
    }
}

/// The five kinds of wait condition.
///
/// `Task` is special: the wait-condition resolver never touches it; clearing
/// task-typed conditions is exclusively the unblock engine's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitKind {
    PrCi,
    PrMerged,
    Comment,
    Time,
    Task,
}

/// A typed, externally-checkable blocking condition.
///
/// `resolved` is monotonic: once true, no code in this crate sets it back
/// to false. `failed` marks conditions that can never resolve (e.g. a PR
/// closed without merging) so callers can stop polling them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitCondition {
    #[serde(rename = "type")]
    pub kind: WaitKind,

    /// What the condition refers to: a PR/issue reference for the GitHub
    /// kinds, an ISO timestamp for `time`, a task id for `task`.
    #[serde(rename = "ref")]
    pub reference: String,

    /// Required for `comment` conditions only: the case-insensitive
    /// substring to look for in comment bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default)]
    pub resolved: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,

    /// Diagnostic text explaining why the condition is still unresolved,
    /// or what went wrong while checking it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Terminal failure: the condition will never resolve.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub failed: bool,
}

impl WaitCondition {
    pub fn new(kind: WaitKind, reference: impl Into<String>) -> Self {
        Self {
            kind,
            reference: reference.into(),
            pattern: None,
            resolved: false,
            resolved_at: None,
            error: None,
            failed: false,
        }
    }

    pub fn comment(reference: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::new(WaitKind::Comment, reference)
        }
    }

    pub fn is_task(&self) -> bool {
        self.kind == WaitKind::Task
    }
}

/// The `waiting_for` field of a task.
///
/// The legacy form is a bare string naming a task or resource ("PR #123
/// review"); newer tasks carry one or many structured conditions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WaitingFor {
    Legacy(String),
    One(WaitCondition),
    Many(Vec<WaitCondition>),
}

impl WaitingFor {
    /// Structured conditions, if any (empty for the legacy string form).
    pub fn conditions(&self) -> &[WaitCondition] {
        match self {
            WaitingFor::Legacy(_) => &[],
            WaitingFor::One(c) => std::slice::from_ref(c),
            WaitingFor::Many(cs) => cs.as_slice(),
        }
    }

    /// Rebuild from a (possibly shrunk) condition list. `None` if empty.
    pub fn from_conditions(mut conditions: Vec<WaitCondition>) -> Option<Self> {
        match conditions.len() {
            0 => None,
            1 => Some(WaitingFor::One(conditions.remove(0))),
            _ => Some(WaitingFor::Many(conditions)),
        }
    }
}

/// Task metadata block, as stored in the task file's TOML header.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskMeta {
    pub id: String,

    #[serde(default)]
    pub state: TaskState,

    /// Task ids (or external-resource URLs, which this crate treats as
    /// always satisfied) that must be resolved before the task may run.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_since: Option<DateTime<Utc>>,

    /// Parent task that spawned this one (fan-in aggregation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawned_from: Option<String>,

    /// Children spawned by this task; the parent completes automatically
    /// once all of them are terminal.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spawned_tasks: Vec<String>,

    /// Kept last so the TOML serializer emits scalar keys before any
    /// condition tables.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting_for: Option<WaitingFor>,
}

impl TaskMeta {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            state: TaskState::New,
            requires: Vec::new(),
            waiting_since: None,
            spawned_from: None,
            spawned_tasks: Vec::new(),
            waiting_for: None,
        }
    }
}

/// A task: metadata plus free-text body, with the path it was loaded from
/// (empty for tasks that only live in memory, e.g. in tests).
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub meta: TaskMeta,
    pub body: String,
    pub path: PathBuf,
}

impl Task {
    pub fn new(meta: TaskMeta) -> Self {
        Self {
            meta,
            body: String::new(),
            path: PathBuf::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.meta.id
    }

    pub fn is_terminal(&self) -> bool {
        self.meta.state.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(TaskState::Done.is_terminal());
        assert!(TaskState::Cancelled.is_terminal());
        assert!(!TaskState::New.is_terminal());
        assert!(!TaskState::Active.is_terminal());
        assert!(!TaskState::Paused.is_terminal());
    }

    #[test]
    fn waiting_for_conditions_view() {
        let c = WaitCondition::new(WaitKind::Task, "task-a");
        assert_eq!(WaitingFor::Legacy("x".into()).conditions().len(), 0);
        assert_eq!(WaitingFor::One(c.clone()).conditions().len(), 1);
        assert_eq!(
            WaitingFor::Many(vec![c.clone(), c]).conditions().len(),
            2
        );
    }

    #[test]
    fn from_conditions_collapses() {
        let c = WaitCondition::new(WaitKind::Task, "task-a");
        assert_eq!(WaitingFor::from_conditions(vec![]), None);
        assert!(matches!(
            WaitingFor::from_conditions(vec![c.clone()]),
            Some(WaitingFor::One(_))
        ));
        assert!(matches!(
            WaitingFor::from_conditions(vec![c.clone(), c]),
            Some(WaitingFor::Many(_))
        ));
    }
}
