// src/graph/unblock.rs

//! Auto-unblock engine: propagates task completion through the dependency
//! graph and performs fan-in completion of parent tasks.
//!
//! This engine mutates only blocking metadata (`waiting_for`,
//! `waiting_since`) on dependents; the single `state` mutation it performs
//! is marking a parent `done` when all of its spawned children are
//! terminal.

use std::collections::{HashMap, HashSet};
use std::fmt;

use tracing::{debug, info};

use crate::errors::Result;
use crate::graph::index::{depends_on, is_resource_url, DependentsIndex};
use crate::graph::contains_token;
use crate::store::{Task, TaskSet, TaskState, TaskStore, WaitingFor};

/// What the engine did to a task in one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    /// `waiting_for` (and `waiting_since`) cleared entirely.
    ClearedWaitingFor,
    /// One dependency resolved, but the task is still waiting on the rest.
    DependencyResolved,
    /// Every `requires` entry is now satisfied.
    NowReady,
    /// Parent task completed because all spawned children are terminal.
    FanInComplete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ActionKind::ClearedWaitingFor => "cleared waiting_for",
            ActionKind::DependencyResolved => "dependency resolved (still waiting)",
            ActionKind::NowReady => "now ready",
            ActionKind::FanInComplete => "all subtasks done (fan-in complete)",
        };
        f.write_str(text)
    }
}

/// One recorded action: which task, and what happened to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnblockAction {
    pub task_id: String,
    pub kind: ActionKind,
}

impl UnblockAction {
    fn new(task_id: &str, kind: ActionKind) -> Self {
        Self {
            task_id: task_id.to_string(),
            kind,
        }
    }
}

/// The dependency-propagation engine.
///
/// Holds a reference to the task store so it can persist exactly the tasks
/// it touched. Concurrent invocations against overlapping task sets are
/// not race-free; callers serialize them.
pub struct UnblockEngine<'s, S: TaskStore> {
    store: &'s S,
}

impl<'s, S: TaskStore> UnblockEngine<'s, S> {
    pub fn new(store: &'s S) -> Self {
        Self { store }
    }

    /// Tasks that directly depend on `completed_id`: exact `requires`
    /// membership, or a token match in a task-typed wait condition ref or
    /// legacy `waiting_for` string. The task itself is excluded even when
    /// self-referential.
    pub fn find_dependents<'t>(&self, completed_id: &str, tasks: &'t TaskSet) -> Vec<&'t Task> {
        tasks
            .values()
            .filter(|t| depends_on(t, completed_id))
            .collect()
    }

    /// Propagate a batch of completed task ids to their dependents.
    ///
    /// Per completed id, per non-terminal dependent:
    /// 1. a legacy `waiting_for` exactly equal to the id is cleared; a
    ///    token-level partial match records the softer action and keeps the
    ///    remaining text untouched
    /// 2. structured task-typed conditions matching the id are removed;
    ///    the field is cleared entirely when none remain
    /// 3. independently, if every `requires` entry is now satisfied (URL
    ///    entries always count; unresolvable ids fail closed), the task is
    ///    reported ready, unless it was already reported cleared this round
    ///
    /// A dependent is persisted only when at least one action was recorded
    /// for it.
    pub fn auto_unblock(
        &self,
        completed_ids: &[String],
        tasks: &mut TaskSet,
    ) -> Result<Vec<UnblockAction>> {
        let completed = dedup(completed_ids);
        let index = DependentsIndex::build(tasks, completed.iter().map(String::as_str));
        let states: HashMap<String, TaskState> = tasks
            .iter()
            .map(|(id, t)| (id.clone(), t.meta.state))
            .collect();

        let mut actions: Vec<UnblockAction> = Vec::new();
        let mut recorded: HashSet<(String, ActionKind)> = HashSet::new();

        for completed_id in &completed {
            let dependent_ids: Vec<String> = index.dependents_of(completed_id).to_vec();
            debug!(
                completed = %completed_id,
                dependents = dependent_ids.len(),
                "propagating completion"
            );

            for dep_id in dependent_ids {
                let Some(task) = tasks.get_mut(&dep_id) else {
                    continue;
                };
                if task.is_terminal() {
                    continue;
                }

                let mut round = unblock_waiting_for(task, completed_id);

                let cleared = round.contains(&ActionKind::ClearedWaitingFor);
                if !cleared && requires_satisfied(&task.meta.requires, &states) {
                    round.push(ActionKind::NowReady);
                }

                if round.is_empty() {
                    continue;
                }

                self.store.save(task)?;
                for kind in round {
                    if recorded.insert((dep_id.clone(), kind)) {
                        info!(task = %dep_id, action = %kind, "unblock action");
                        actions.push(UnblockAction::new(&dep_id, kind));
                    }
                }
            }
        }

        Ok(actions)
    }

    /// Fan-in: if the completed task has a parent whose spawned children
    /// are now all terminal, mark the parent done.
    ///
    /// A parent with an empty `spawned_tasks` list never fan-in-completes.
    pub fn check_fan_in(
        &self,
        completed_id: &str,
        tasks: &mut TaskSet,
    ) -> Result<Option<UnblockAction>> {
        let Some(parent_id) = tasks
            .get(completed_id)
            .and_then(|t| t.meta.spawned_from.clone())
        else {
            return Ok(None);
        };

        let Some(parent) = tasks.get(&parent_id) else {
            return Ok(None);
        };
        if parent.is_terminal() || parent.meta.spawned_tasks.is_empty() {
            return Ok(None);
        }

        let all_children_terminal = parent.meta.spawned_tasks.iter().all(|child| {
            tasks
                .get(child)
                .is_some_and(|c| c.is_terminal())
        });
        if !all_children_terminal {
            return Ok(None);
        }

        let Some(parent) = tasks.get_mut(&parent_id) else {
            return Ok(None);
        };
        parent.meta.state = TaskState::Done;
        self.store.save(parent)?;
        info!(parent = %parent_id, "fan-in complete; parent marked done");

        Ok(Some(UnblockAction::new(
            &parent_id,
            ActionKind::FanInComplete,
        )))
    }

    /// Composite entry point: evaluate fan-in for every completed task,
    /// fold newly-completed parents into the completed set, then propagate
    /// the union through `auto_unblock` so a parent's own dependents are
    /// unblocked in the same pass.
    ///
    /// One fan-in level per pass: deeper chains need another invocation.
    pub fn auto_unblock_with_fan_in(
        &self,
        completed_ids: &[String],
        tasks: &mut TaskSet,
    ) -> Result<Vec<UnblockAction>> {
        let mut all = dedup(completed_ids);
        let mut actions = Vec::new();

        for completed_id in dedup(completed_ids) {
            if let Some(action) = self.check_fan_in(&completed_id, tasks)? {
                if !all.contains(&action.task_id) {
                    all.push(action.task_id.clone());
                }
                actions.push(action);
            }
        }

        actions.extend(self.auto_unblock(&all, tasks)?);
        Ok(actions)
    }
}

/// Steps 1 and 2: update a dependent's `waiting_for` for one completed id.
/// Returns the actions recorded (at most one).
fn unblock_waiting_for(task: &mut Task, completed_id: &str) -> Vec<ActionKind> {
    match task.meta.waiting_for.clone() {
        Some(WaitingFor::Legacy(text)) => {
            if text.trim() == completed_id {
                task.meta.waiting_for = None;
                task.meta.waiting_since = None;
                vec![ActionKind::ClearedWaitingFor]
            } else if contains_token(&text, completed_id) {
                // Other blockers named in the same free text; keep it.
                vec![ActionKind::DependencyResolved]
            } else {
                Vec::new()
            }
        }
        Some(structured) => {
            let (removed, kept): (Vec<_>, Vec<_>) = structured
                .conditions()
                .iter()
                .cloned()
                .partition(|c| c.is_task() && contains_token(&c.reference, completed_id));

            if removed.is_empty() {
                Vec::new()
            } else if kept.is_empty() {
                task.meta.waiting_for = None;
                task.meta.waiting_since = None;
                vec![ActionKind::ClearedWaitingFor]
            } else {
                task.meta.waiting_for = WaitingFor::from_conditions(kept);
                vec![ActionKind::DependencyResolved]
            }
        }
        None => Vec::new(),
    }
}

/// Step 3: every `requires` entry satisfied? URL-form entries always count
/// as satisfied; ids that resolve to no known task fail closed.
fn requires_satisfied(requires: &[String], states: &HashMap<String, TaskState>) -> bool {
    requires.iter().all(|req| {
        if is_resource_url(req) {
            return true;
        }
        states.get(req).is_some_and(|s| s.is_terminal())
    })
}

fn dedup(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .filter(|id| seen.insert(id.as_str()))
        .cloned()
        .collect()
}
