// src/lock/record.rs

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted lock record: one JSON file per claimed task.
///
/// Age and expiry are derived from `started` + `timeout_hours`, never
/// stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LockRecord {
    pub task_id: String,

    /// Identity of the worker/session holding the lock.
    pub worker: String,

    /// When the lock was (last) acquired, UTC.
    pub started: DateTime<Utc>,

    pub timeout_hours: f64,
}

impl LockRecord {
    pub fn new(task_id: impl Into<String>, worker: impl Into<String>, timeout_hours: f64) -> Self {
        Self {
            task_id: task_id.into(),
            worker: worker.into(),
            started: Utc::now(),
            timeout_hours,
        }
    }

    /// Hours elapsed since the lock was acquired or refreshed.
    pub fn age_hours(&self) -> f64 {
        let elapsed = Utc::now().signed_duration_since(self.started);
        elapsed.num_milliseconds() as f64 / 3_600_000.0
    }

    pub fn is_expired(&self) -> bool {
        self.age_hours() > self.timeout_hours
    }
}

/// Filesystem-safe encoding of a task id for use as a lock filename.
///
/// Keeps `[A-Za-z0-9._-]`, maps everything else to `_`.
pub fn encode_task_id(task_id: &str) -> String {
    task_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
