// src/wait/mod.rs

//! Wait-condition resolution: translating non-task blocking conditions
//! (CI status, merge status, comment patterns, deadlines) into
//! resolved/unresolved state against external systems.
//!
//! Task-typed conditions are deliberately never resolved here; the unblock
//! engine in [`crate::graph`] is the sole authority for those.

mod host;
mod reference;
mod resolver;

pub use host::{CheckRun, GhClient, HostClient, PrStatus};
pub use reference::{parse_pr_ref, parse_timestamp, PrRef};
pub use resolver::{pending_reasons, SweepUpdate, WaitResolver};
