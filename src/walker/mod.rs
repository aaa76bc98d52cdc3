//! Concurrent share walker
//!
//! This module fans out one task per directory and one per file, reads
//! every file to the end and collects one completion signal per task.
//!
//! # Architecture
//!
//! ```text
//!                     ┌─────────────────────────┐
//!                     │     WalkCoordinator     │
//!                     │  - N sessions           │
//!                     │  - one root walk each   │
//!                     └───────────┬─────────────┘
//!                                 │
//!       ┌─────────────────────────┼─────────────────────────┐
//!       │                         │                         │
//! ┌─────▼─────┐             ┌─────▼─────┐             ┌─────▼─────┐
//! │ Walk job  │             │ Walk job  │             │ Drain job │
//! │ list dir  │──children──▶│ list dir  │──children──▶│ read file │
//! └─────┬─────┘             └─────┬─────┘             └─────┬─────┘
//!       │                         │                         │
//!       └──────── CompletionSignal (one per job) ───────────┘
//!                                 │
//!                     ┌───────────▼─────────────┐
//!                     │  CompletionAggregator   │
//!                     │  wait_for / settled     │
//!                     └─────────────────────────┘
//! ```
//!
//! With `max_in_flight` set, jobs pass through a semaphore-bounded queue
//! instead of being spawned directly.

pub mod aggregator;
pub mod coordinator;
mod queue;
pub mod walk;

pub use aggregator::{completion_channel, CompletionAggregator, CompletionSignal, CompletionSummary, Failure, SignalSender};
pub use coordinator::{WalkCoordinator, WalkResult};
pub use walk::{
    child_dir_path, child_file_path, classify, drain_file, walk, JobKind, Visit, WalkOptions, WalkProgress, WalkStats,
    Walker,
};
