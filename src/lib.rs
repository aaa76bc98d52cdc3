//! smb-walker - Concurrent share walker and reader
//!
//! Walks a file share recursively, reads every regular file to the end and
//! counts one completion signal per directory listed and per file read.
//! Several independent sessions can walk the same tree at once.
//!
//! # Features
//!
//! - **Fan-out per entry**: every subdirectory and every file gets its own
//!   task, optionally capped by a semaphore-bounded work queue.
//!
//! - **Exact completion counting**: waiters either block for a known
//!   number of file signals or let directory jobs announce how many
//!   children they scheduled.
//!
//! - **Pluggable share clients**: the walker only sees the `Session`,
//!   `DirectoryStream` and `FileStream` traits. Clients that cannot take
//!   concurrent requests are serialized automatically.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      Share server                                │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │
//!                               │ Session x N
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Walker tasks                               │
//! │  ┌─────────┐  ┌─────────┐  ┌─────────┐         ┌─────────┐     │
//! │  │  walk   │  │  walk   │  │  drain  │  ...    │  drain  │     │
//! │  │  dir/   │  │  dir/a/ │  │  dir/f  │         │ dir/a/g │     │
//! │  └────┬────┘  └────┬────┘  └────┬────┘         └────┬────┘     │
//! │       └────────────┴─────┬──────┴────────────────────┘          │
//! │                          ▼                                      │
//! │            ┌──────────────────────────┐                         │
//! │            │  Completion aggregator   │                         │
//! │            │  (one signal per task)   │                         │
//! │            └──────────────────────────┘                         │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```bash
//! # Serve a local directory as share "public" and walk it with 4 sessions
//! smb-walker smb://localhost/public/ --mount public=/srv/public -s 4
//!
//! # Cap concurrency and require exactly 128 files
//! smb-walker smb://localhost/public/ -m public=/srv/public -j 32 --expect-files 128
//! ```

pub mod config;
pub mod error;
pub mod progress;
pub mod smb;
pub mod walker;

pub use config::{CliArgs, ShareUrl, WalkConfig};
pub use error::{ConfigError, Result, SessionError, WalkerError};
pub use walker::{WalkCoordinator, WalkResult};
