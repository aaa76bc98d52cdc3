//! Share client access
//!
//! The walker talks to a remote share only through the traits in this
//! module. A protocol client plugs in by implementing them.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     Connector                        │
//! │  - connect() -> one independent Session             │
//! └─────────────────────────┬───────────────────────────┘
//!                           │
//!                           ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                      Session                         │
//! │  - open_directory() -> DirectoryStream              │
//! │  - open_file()      -> FileStream                   │
//! │  - shared by many walker tasks (Arc<dyn Session>)   │
//! └─────────────────────────────────────────────────────┘
//!          │                                │
//!          ▼                                ▼
//! ┌──────────────────────┐       ┌──────────────────────┐
//! │   DirectoryStream    │       │      FileStream      │
//! │  next_entry() lazy   │       │  read() chunked      │
//! │  close() once        │       │  close() once        │
//! └──────────────────────┘       └──────────────────────┘
//! ```
//!
//! Backends:
//! - [`memory::MemoryShare`]: in-memory tree with fault injection
//! - [`local::LocalShare`]: local directories exposed as shares
//!
//! Clients that cannot multiplex operations report
//! `is_concurrent() == false` and get wrapped in a [`SerializedSession`].

pub mod local;
pub mod memory;
mod serialized;
pub mod types;

pub use local::LocalShare;
pub use memory::{MemoryShare, MemoryShareBuilder};
pub use serialized::SerializedSession;
pub use types::{Dirent, EntryKind, OpenFlags, ReadOutcome};

use crate::error::SessionResult;
use async_trait::async_trait;
use std::sync::Arc;

/// One authenticated handle to a remote share
///
/// A session is shared by every task of a walk. Implementations that
/// return `true` from [`Session::is_concurrent`] must tolerate operations
/// issued from many tasks at once.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier used in logs
    fn id(&self) -> usize;

    /// Whether the client is safe for concurrent multiplexed use
    fn is_concurrent(&self) -> bool {
        true
    }

    /// Open a directory for listing
    async fn open_directory(&self, path: &str) -> SessionResult<Box<dyn DirectoryStream>>;

    /// Open a file for reading
    async fn open_file(&self, path: &str, flags: OpenFlags) -> SessionResult<Box<dyn FileStream>>;

    /// Tear the session down; later operations fail with `SessionError::Closed`
    async fn close(&self) -> SessionResult<()> {
        Ok(())
    }
}

/// A lazy, forward-only listing of one directory
#[async_trait]
pub trait DirectoryStream: Send {
    /// Next entry, or `None` once the listing is exhausted
    ///
    /// After the first `None` every later call returns `None` too.
    async fn next_entry(&mut self) -> SessionResult<Option<Dirent>>;

    /// Release the remote handle
    async fn close(self: Box<Self>) -> SessionResult<()>;
}

/// A sequentially read file
#[async_trait]
pub trait FileStream: Send {
    /// Read up to `buf.len()` bytes into `buf`
    async fn read(&mut self, buf: &mut [u8]) -> SessionResult<ReadOutcome>;

    /// Release the remote handle
    async fn close(self: Box<Self>) -> SessionResult<()>;
}

/// Creates independent sessions against one server
#[async_trait]
pub trait Connector: Send + Sync {
    /// Server name for display
    fn server(&self) -> &str;

    /// Establish a new session
    async fn connect(&self, session_id: usize) -> SessionResult<Arc<dyn Session>>;
}
