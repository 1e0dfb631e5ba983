//! Ledger module: the pending list, the lifecycle ledger, and the queue
//! manager that owns both files.
//!
//! - `model`: persisted file shapes, [`Batch`], and load-time normalization of
//!   older layouts.
//! - `repo`: [`QueueManager`], the only code allowed to write either file.
//!
//! Callers import from `summary_relay::ledger` directly.

pub mod model;
pub mod repo;

pub use model::{Batch, QueueCounts};
pub use repo::{BatchLimits, QueueManager};
