// src/store/memory.rs

//! In-memory task store used by unit tests and by callers that manage
//! persistence themselves.

use std::sync::Mutex;

use crate::errors::Result;
use crate::store::{Task, TaskSet, TaskStore};

/// A [`TaskStore`] backed by a plain map.
///
/// Also records the ids passed to [`TaskStore::save`], so tests can assert
/// that the engine persists exactly the tasks it touched.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    tasks: TaskSet,
    saved: Vec<String>,
}

impl MemoryTaskStore {
    pub fn new(tasks: TaskSet) -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks,
                saved: Vec::new(),
            }),
        }
    }

    /// Ids that have been saved, in order (duplicates preserved).
    pub fn saved_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().saved.clone()
    }

    /// Current stored copy of a task, if present.
    pub fn get(&self, id: &str) -> Option<Task> {
        self.inner.lock().unwrap().tasks.get(id).cloned()
    }
}

impl TaskStore for MemoryTaskStore {
    fn load_all(&self) -> Result<TaskSet> {
        Ok(self.inner.lock().unwrap().tasks.clone())
    }

    fn save(&self, task: &Task) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.saved.push(task.meta.id.clone());
        inner.tasks.insert(task.meta.id.clone(), task.clone());
        Ok(())
    }
}
