// src/graph/mod.rs

//! Dependency graph, auto-unblock engine, and unblocking-power ranker.
//!
//! The graph is implicit: it is rebuilt from every task's `requires` list
//! and task-typed wait conditions on each engine invocation, as an explicit
//! adjacency map so traversals stay linear.

mod index;
mod rank;
mod unblock;

pub use index::{contains_token, DependentsIndex};
pub use rank::unblocking_power;
pub use unblock::{ActionKind, UnblockAction, UnblockEngine};
