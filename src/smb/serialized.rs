//! Serialized session wrapper
//!
//! Some share clients keep per-connection state that breaks when two
//! requests interleave. Wrapping such a session here funnels every session
//! and stream operation through one async mutex, so the walker can still
//! share it between tasks.

use super::{DirectoryStream, Dirent, FileStream, OpenFlags, ReadOutcome, Session};
use crate::error::SessionResult;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

/// A session whose operations run one at a time
pub struct SerializedSession {
    inner: Arc<dyn Session>,
    lock: Arc<Mutex<()>>,
}

impl SerializedSession {
    pub fn new(inner: Arc<dyn Session>) -> Self {
        Self {
            inner,
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Wrap `session` only if it cannot take concurrent operations
    pub fn wrap_if_needed(session: Arc<dyn Session>) -> Arc<dyn Session> {
        if session.is_concurrent() {
            session
        } else {
            Arc::new(Self::new(session))
        }
    }
}

#[async_trait]
impl Session for SerializedSession {
    fn id(&self) -> usize {
        self.inner.id()
    }

    fn is_concurrent(&self) -> bool {
        true
    }

    async fn open_directory(&self, path: &str) -> SessionResult<Box<dyn DirectoryStream>> {
        let _guard = self.lock.lock().await;
        let stream = self.inner.open_directory(path).await?;
        Ok(Box::new(SerializedDirectory {
            inner: stream,
            lock: Arc::clone(&self.lock),
        }))
    }

    async fn open_file(&self, path: &str, flags: OpenFlags) -> SessionResult<Box<dyn FileStream>> {
        let _guard = self.lock.lock().await;
        let stream = self.inner.open_file(path, flags).await?;
        Ok(Box::new(SerializedFile {
            inner: stream,
            lock: Arc::clone(&self.lock),
        }))
    }

    async fn close(&self) -> SessionResult<()> {
        let _guard = self.lock.lock().await;
        self.inner.close().await
    }
}

struct SerializedDirectory {
    inner: Box<dyn DirectoryStream>,
    lock: Arc<Mutex<()>>,
}

#[async_trait]
impl DirectoryStream for SerializedDirectory {
    async fn next_entry(&mut self) -> SessionResult<Option<Dirent>> {
        let _guard = self.lock.lock().await;
        self.inner.next_entry().await
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        let _guard = self.lock.lock().await;
        self.inner.close().await
    }
}

struct SerializedFile {
    inner: Box<dyn FileStream>,
    lock: Arc<Mutex<()>>,
}

#[async_trait]
impl FileStream for SerializedFile {
    async fn read(&mut self, buf: &mut [u8]) -> SessionResult<ReadOutcome> {
        let _guard = self.lock.lock().await;
        self.inner.read(buf).await
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        let _guard = self.lock.lock().await;
        self.inner.close().await
    }
}
