// src/store/mod.rs

//! Task store: the narrow slice of task metadata this crate reads and
//! mutates, plus the storage port and its file-backed implementation.
//!
//! The core never invents metadata fields: it only clears/sets
//! `waiting_for`/`waiting_since` and sets `state = done` on fan-in parents.

mod file;
mod memory;
mod model;

use std::collections::BTreeMap;

pub use file::{split_metadata_block, FileTaskStore};
pub use memory::MemoryTaskStore;
pub use model::{Task, TaskMeta, TaskState, WaitCondition, WaitKind, WaitingFor};

use crate::errors::Result;

/// All known tasks, keyed by task id.
///
/// A `BTreeMap` keeps iteration order deterministic, which keeps the order
/// of recorded unblock actions stable across runs.
pub type TaskSet = BTreeMap<String, Task>;

/// Storage port consumed by the unblock engine and the wait-condition sweep.
///
/// Implementations: [`FileTaskStore`] for the shared working directory,
/// [`MemoryTaskStore`] for tests.
pub trait TaskStore {
    /// Load every task in the store.
    fn load_all(&self) -> Result<TaskSet>;

    /// Persist a single (mutated) task.
    fn save(&self, task: &Task) -> Result<()>;
}
