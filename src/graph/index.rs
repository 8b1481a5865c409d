// src/graph/index.rs

use std::collections::HashMap;

use crate::store::{Task, TaskSet, WaitingFor};

/// Adjacency lookup from a task id to the ids of tasks depending on it.
///
/// Built once per engine/ranker call; the traversal then never re-filters
/// the full task list.
pub struct DependentsIndex {
    dependents: HashMap<String, Vec<String>>,
}

impl DependentsIndex {
    /// Build the index over all tasks.
    ///
    /// `extra_candidates` adds ids that should be matchable as dependencies
    /// even though no task in the set carries them (e.g. just-completed
    /// tasks that have since been pruned from the store).
    pub fn build<'a>(tasks: &TaskSet, extra_candidates: impl IntoIterator<Item = &'a str>) -> Self {
        let mut candidates: Vec<&str> = tasks.keys().map(String::as_str).collect();
        for id in extra_candidates {
            if !candidates.contains(&id) {
                candidates.push(id);
            }
        }

        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for task in tasks.values() {
            // Exact `requires` entries may name tasks outside the set too.
            for req in &task.meta.requires {
                if is_resource_url(req) || req == task.id() {
                    continue;
                }
                push_edge(&mut dependents, req, task.id());
            }

            for &candidate in &candidates {
                if candidate == task.id() {
                    continue;
                }
                if waits_on(task, candidate) {
                    push_edge(&mut dependents, candidate, task.id());
                }
            }
        }

        Self { dependents }
    }

    /// Ids of tasks directly depending on `id`.
    pub fn dependents_of(&self, id: &str) -> &[String] {
        self.dependents.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn push_edge(map: &mut HashMap<String, Vec<String>>, from: &str, to: &str) {
    let entry = map.entry(from.to_string()).or_default();
    if !entry.iter().any(|e| e == to) {
        entry.push(to.to_string());
    }
}

/// Whether `task` depends on `id`: exact membership in `requires`, or a
/// token match against a task-typed wait condition ref or the legacy
/// `waiting_for` string.
pub(crate) fn depends_on(task: &Task, id: &str) -> bool {
    if task.id() == id {
        return false;
    }
    if task.meta.requires.iter().any(|r| r == id) {
        return true;
    }
    waits_on(task, id)
}

fn waits_on(task: &Task, id: &str) -> bool {
    match &task.meta.waiting_for {
        Some(WaitingFor::Legacy(text)) => contains_token(text, id),
        Some(structured) => structured
            .conditions()
            .iter()
            .any(|c| c.is_task() && contains_token(&c.reference, id)),
        None => false,
    }
}

/// URL-form `requires` entries are resolved elsewhere; this crate treats
/// them as always satisfied.
pub(crate) fn is_resource_url(entry: &str) -> bool {
    entry.contains("://")
}

/// Substring containment at token boundaries: a match must not be flanked
/// by identifier characters, so completing `t1` never touches a task
/// waiting on `t10`.
pub fn contains_token(haystack: &str, needle: &str) -> bool {
    if needle.is_empty() {
        return false;
    }

    let mut start = 0;
    while let Some(pos) = haystack[start..].find(needle) {
        let at = start + pos;
        let end = at + needle.len();

        let before_ok = haystack[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !is_ident_char(c));
        let after_ok = haystack[end..]
            .chars()
            .next()
            .is_none_or(|c| !is_ident_char(c));
        if before_ok && after_ok {
            return true;
        }

        start = end;
    }
    false
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.')
}
