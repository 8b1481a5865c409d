// src/graph/rank.rs

use std::collections::HashSet;

use crate::graph::index::DependentsIndex;
use crate::store::TaskSet;

/// Number of distinct non-terminal tasks that completing `task_id` would
/// transitively help unblock.
///
/// Breadth-first over the dependents index with a visited set, so diamond
/// shapes count each task once and cycles terminate. Terminal tasks are
/// excluded from the count and not traversed through.
pub fn unblocking_power(task_id: &str, tasks: &TaskSet) -> usize {
    let index = DependentsIndex::build(tasks, [task_id]);

    let mut visited: HashSet<&str> = HashSet::new();
    visited.insert(task_id);
    let mut queue: Vec<&str> = vec![task_id];

    while let Some(current) = queue.pop() {
        for dep_id in index.dependents_of(current) {
            let alive = tasks.get(dep_id).is_some_and(|t| !t.is_terminal());
            if alive && visited.insert(dep_id) {
                queue.push(dep_id);
            }
        }
    }

    visited.len() - 1
}
