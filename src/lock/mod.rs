// src/lock/mod.rs

//! Per-task advisory lock files: mutual exclusion with expiry and takeover.
//!
//! One small JSON record per claimed task. A lock file's existence plus
//! non-expiry is the sole source of truth for "is this task claimed"; the
//! read-modify-write inside [`LockManager::acquire`] happens under an
//! OS-level exclusive lock on the lock file itself, so two concurrent
//! acquires for the same task can never both win.

mod manager;
mod record;

pub use manager::{AcquireOutcome, LockManager, ReleaseOutcome};
pub use record::{encode_task_id, LockRecord};
