// src/lib.rs

//! workdag: coordination primitives for many workers sharing one pool of
//! file-backed tasks.
//!
//! The crate has four load-bearing parts:
//! - [`lock`]: per-task advisory locks with expiry and takeover, so two
//!   workers never run the same task
//! - [`wait`]: resolution of typed external wait conditions (CI status,
//!   merge status, comment patterns, deadlines) against a host client
//! - [`graph`]: the implicit dependency graph, the auto-unblock engine
//!   that propagates completions through it, and the unblocking-power
//!   ranker
//! - [`store`]: the task model and its on-disk format (markdown files
//!   with a TOML metadata header)
//!
//! Everything is driven by callers; the crate spawns no background work
//! of its own.

pub mod config;
pub mod errors;
pub mod graph;
pub mod lock;
pub mod logging;
pub mod store;
pub mod wait;

pub use crate::config::Config;
pub use crate::errors::{Result, WorkdagError};
pub use crate::graph::{unblocking_power, ActionKind, UnblockAction, UnblockEngine};
pub use crate::lock::{AcquireOutcome, LockManager, LockRecord, ReleaseOutcome};
pub use crate::store::{
    FileTaskStore, Task, TaskMeta, TaskSet, TaskState, TaskStore, WaitCondition, WaitKind,
    WaitingFor,
};
pub use crate::wait::{GhClient, HostClient, WaitResolver};
