//! In-memory share backend
//!
//! Holds a URL-keyed tree of directories and files and serves it through
//! the session traits. Besides fixtures for tests and benchmarks it can:
//! - inject open, listing and read failures on chosen paths
//! - cap every read to emulate short reads
//! - count open handles and the peak number of overlapping operations
//!
//! Listings start with "." and ".." the way an SMB server returns them.

use super::{Connector, DirectoryStream, Dirent, EntryKind, FileStream, OpenFlags, ReadOutcome, Session};
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Node {
    Directory(BTreeMap<String, EntryKind>),
    File(Arc<Vec<u8>>),
    Other,
}

impl Node {
    fn kind(&self) -> EntryKind {
        match self {
            Node::Directory(_) => EntryKind::Directory,
            Node::File(_) => EntryKind::File,
            Node::Other => EntryKind::Other,
        }
    }
}

#[derive(Debug, Clone)]
enum Fault {
    Open(SessionError),
    ReadAfter(usize),
    ListAfter(usize),
}

/// Shared state behind every session of one share
#[derive(Debug, Default)]
struct ShareState {
    nodes: HashMap<String, Node>,
    faults: HashMap<String, Fault>,
    max_read: Option<usize>,
    single_threaded: bool,
    open_handles: AtomicUsize,
    active_ops: AtomicUsize,
    peak_ops: AtomicUsize,
    opened_files: AtomicU64,
    sessions: AtomicUsize,
    closed_sessions: AtomicUsize,
}

impl ShareState {
    fn fault(&self, path: &str) -> Option<&Fault> {
        self.faults.get(normalize(path))
    }

    /// Mark one operation as running until the guard drops
    async fn enter(&self) -> OpGuard<'_> {
        let active = self.active_ops.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_ops.fetch_max(active, Ordering::SeqCst);
        // Give other tasks a chance to overlap with this operation
        tokio::task::yield_now().await;
        OpGuard { state: self }
    }
}

struct OpGuard<'a> {
    state: &'a ShareState,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.state.active_ops.fetch_sub(1, Ordering::SeqCst);
    }
}

fn normalize(path: &str) -> &str {
    path.trim_end_matches('/')
}

/// Split `path` into parent and name, stopping at `root`
fn split_parent<'a>(root: &str, path: &'a str) -> Option<(&'a str, &'a str)> {
    if path.len() <= root.len() {
        return None;
    }
    let (parent, name) = path.rsplit_once('/')?;
    if parent.len() < root.len() {
        return None;
    }
    Some((parent, name))
}

/// Builder for a [`MemoryShare`]
pub struct MemoryShareBuilder {
    root: String,
    state: ShareState,
}

impl MemoryShareBuilder {
    fn insert(mut self, path: &str, node: Node) -> Self {
        let path = normalize(path).to_string();
        let mut child_kind = node.kind();
        let mut current = path.clone();

        // Directories keep their children when re-declared
        let redeclared_dir = matches!(node, Node::Directory(_))
            && matches!(self.state.nodes.get(&path), Some(Node::Directory(_)));
        if !redeclared_dir {
            self.state.nodes.insert(path.clone(), node);
        }

        while let Some((parent, name)) = split_parent(&self.root, &current) {
            let entry = self
                .state
                .nodes
                .entry(parent.to_string())
                .or_insert_with(|| Node::Directory(BTreeMap::new()));
            if let Node::Directory(children) = entry {
                children.insert(name.to_string(), child_kind);
            }
            child_kind = EntryKind::Directory;
            current = parent.to_string();
        }
        self
    }

    /// Add a directory (and any missing parents)
    pub fn dir(self, path: impl AsRef<str>) -> Self {
        self.insert(path.as_ref(), Node::Directory(BTreeMap::new()))
    }

    /// Add a file with the given contents (and any missing parents)
    pub fn file(self, path: impl AsRef<str>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path.as_ref(), Node::File(Arc::new(contents.into())))
    }

    /// Add an entry that is neither file nor directory
    pub fn other(self, path: impl AsRef<str>) -> Self {
        self.insert(path.as_ref(), Node::Other)
    }

    /// Opening `path` (directory or file) fails with `error`
    pub fn fail_open(mut self, path: impl AsRef<str>, error: SessionError) -> Self {
        self.state
            .faults
            .insert(normalize(path.as_ref()).to_string(), Fault::Open(error));
        self
    }

    /// Reading `path` fails after `chunks` successful reads
    pub fn fail_read_after(mut self, path: impl AsRef<str>, chunks: usize) -> Self {
        self.state
            .faults
            .insert(normalize(path.as_ref()).to_string(), Fault::ReadAfter(chunks));
        self
    }

    /// Listing `path` fails after `entries` entries (counting "." and "..")
    pub fn fail_list_after(mut self, path: impl AsRef<str>, entries: usize) -> Self {
        self.state
            .faults
            .insert(normalize(path.as_ref()).to_string(), Fault::ListAfter(entries));
        self
    }

    /// Never return more than `bytes` from one read
    pub fn max_read(mut self, bytes: usize) -> Self {
        self.state.max_read = Some(bytes);
        self
    }

    /// Sessions report that they cannot run operations concurrently
    pub fn single_threaded(mut self) -> Self {
        self.state.single_threaded = true;
        self
    }

    pub fn build(mut self) -> MemoryShare {
        self.state
            .nodes
            .entry(self.root.clone())
            .or_insert_with(|| Node::Directory(BTreeMap::new()));
        MemoryShare {
            root: self.root,
            state: Arc::new(self.state),
        }
    }
}

/// An in-memory share tree served to any number of sessions
#[derive(Clone)]
pub struct MemoryShare {
    root: String,
    state: Arc<ShareState>,
}

impl MemoryShare {
    /// Start building a tree rooted at a server URL such as `smb://localhost`
    pub fn builder(root: impl Into<String>) -> MemoryShareBuilder {
        let root = root.into();
        MemoryShareBuilder {
            root: normalize(&root).to_string(),
            state: ShareState::default(),
        }
    }

    /// Streams opened and not yet closed, across all sessions
    pub fn open_handles(&self) -> usize {
        self.state.open_handles.load(Ordering::SeqCst)
    }

    /// Largest number of operations seen running at the same time
    pub fn peak_concurrency(&self) -> usize {
        self.state.peak_ops.load(Ordering::SeqCst)
    }

    /// Number of successful file opens
    pub fn opened_files(&self) -> u64 {
        self.state.opened_files.load(Ordering::SeqCst)
    }

    /// Sessions created so far
    pub fn sessions(&self) -> usize {
        self.state.sessions.load(Ordering::SeqCst)
    }

    /// Sessions explicitly closed so far
    pub fn closed_sessions(&self) -> usize {
        self.state.closed_sessions.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryShare {
    fn server(&self) -> &str {
        &self.root
    }

    async fn connect(&self, session_id: usize) -> SessionResult<Arc<dyn Session>> {
        self.state.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySession {
            id: session_id,
            state: Arc::clone(&self.state),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One session against a [`MemoryShare`]
pub struct MemorySession {
    id: usize,
    state: Arc<ShareState>,
    closed: AtomicBool,
}

impl MemorySession {
    fn check_open(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed { id: self.id })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Session for MemorySession {
    fn id(&self) -> usize {
        self.id
    }

    fn is_concurrent(&self) -> bool {
        !self.state.single_threaded
    }

    async fn open_directory(&self, path: &str) -> SessionResult<Box<dyn DirectoryStream>> {
        self.check_open()?;
        let _op = self.state.enter().await;

        let mut fail_after = None;
        match self.state.fault(path) {
            Some(Fault::Open(err)) => return Err(err.clone()),
            Some(Fault::ListAfter(n)) => fail_after = Some(*n),
            _ => {}
        }

        let children = match self.state.nodes.get(normalize(path)) {
            Some(Node::Directory(children)) => children,
            Some(_) => {
                return Err(SessionError::NotADirectory {
                    path: path.to_string(),
                })
            }
            None => {
                return Err(SessionError::NotFound {
                    path: path.to_string(),
                })
            }
        };

        let mut entries = VecDeque::with_capacity(children.len() + 2);
        entries.push_back(Dirent::new(".", EntryKind::Directory));
        entries.push_back(Dirent::new("..", EntryKind::Directory));
        entries.extend(children.iter().map(|(name, kind)| Dirent::new(name.clone(), *kind)));

        self.state.open_handles.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryDirectory {
            path: path.to_string(),
            entries,
            returned: 0,
            fail_after,
            state: Arc::clone(&self.state),
        }))
    }

    async fn open_file(&self, path: &str, _flags: OpenFlags) -> SessionResult<Box<dyn FileStream>> {
        self.check_open()?;
        let _op = self.state.enter().await;

        let mut fail_after = None;
        match self.state.fault(path) {
            Some(Fault::Open(err)) => return Err(err.clone()),
            Some(Fault::ReadAfter(n)) => fail_after = Some(*n),
            _ => {}
        }

        let data = match self.state.nodes.get(normalize(path)) {
            Some(Node::File(data)) => Arc::clone(data),
            Some(Node::Directory(_)) => {
                return Err(SessionError::IsADirectory {
                    path: path.to_string(),
                })
            }
            Some(Node::Other) => {
                return Err(SessionError::PermissionDenied {
                    path: path.to_string(),
                })
            }
            None => {
                return Err(SessionError::NotFound {
                    path: path.to_string(),
                })
            }
        };

        self.state.open_handles.fetch_add(1, Ordering::SeqCst);
        self.state.opened_files.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryFile {
            path: path.to_string(),
            data,
            pos: 0,
            chunks: 0,
            fail_after,
            state: Arc::clone(&self.state),
        }))
    }

    async fn close(&self) -> SessionResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.closed_sessions.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

struct MemoryDirectory {
    path: String,
    entries: VecDeque<Dirent>,
    returned: usize,
    fail_after: Option<usize>,
    state: Arc<ShareState>,
}

#[async_trait]
impl DirectoryStream for MemoryDirectory {
    async fn next_entry(&mut self) -> SessionResult<Option<Dirent>> {
        let _op = self.state.enter().await;
        if let Some(limit) = self.fail_after {
            if self.returned >= limit {
                return Err(SessionError::ReadDirFailed {
                    path: self.path.clone(),
                    reason: "injected listing failure".to_string(),
                });
            }
        }
        let entry = self.entries.pop_front();
        if entry.is_some() {
            self.returned += 1;
        }
        Ok(entry)
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        self.state.open_handles.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MemoryFile {
    path: String,
    data: Arc<Vec<u8>>,
    pos: usize,
    chunks: usize,
    fail_after: Option<usize>,
    state: Arc<ShareState>,
}

#[async_trait]
impl FileStream for MemoryFile {
    async fn read(&mut self, buf: &mut [u8]) -> SessionResult<ReadOutcome> {
        let _op = self.state.enter().await;
        if let Some(limit) = self.fail_after {
            if self.chunks >= limit {
                return Err(SessionError::ReadFailed {
                    path: self.path.clone(),
                    reason: "injected read failure".to_string(),
                });
            }
        }

        let remaining = self.data.len() - self.pos;
        if remaining == 0 {
            return Ok(ReadOutcome::EndOfStream);
        }

        let mut n = buf.len().min(remaining);
        if let Some(max) = self.state.max_read {
            n = n.min(max);
        }
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        self.chunks += 1;
        Ok(ReadOutcome::Bytes(n))
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        self.state.open_handles.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn list(session: &dyn Session, path: &str) -> Vec<Dirent> {
        let mut dir = session.open_directory(path).await.unwrap();
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await.unwrap() {
            entries.push(entry);
        }
        dir.close().await.unwrap();
        entries
    }

    #[tokio::test]
    async fn test_parents_are_created() {
        let share = MemoryShare::builder("smb://localhost")
            .file("smb://localhost/public/a/b/file.txt", b"hello".to_vec())
            .build();
        let session = share.connect(0).await.unwrap();

        let root = list(session.as_ref(), "smb://localhost").await;
        assert_eq!(
            root,
            vec![
                Dirent::new(".", EntryKind::Directory),
                Dirent::new("..", EntryKind::Directory),
                Dirent::new("public", EntryKind::Directory),
            ]
        );

        let b = list(session.as_ref(), "smb://localhost/public/a/b/").await;
        assert_eq!(b[2], Dirent::new("file.txt", EntryKind::File));
    }

    #[tokio::test]
    async fn test_end_of_stream_is_idempotent() {
        let share = MemoryShare::builder("smb://localhost")
            .dir("smb://localhost/public/empty/")
            .build();
        let session = share.connect(0).await.unwrap();

        let mut dir = session
            .open_directory("smb://localhost/public/empty/")
            .await
            .unwrap();
        assert_eq!(dir.next_entry().await.unwrap().unwrap().name, ".");
        assert_eq!(dir.next_entry().await.unwrap().unwrap().name, "..");
        for _ in 0..3 {
            assert_eq!(dir.next_entry().await.unwrap(), None);
        }
        dir.close().await.unwrap();
        assert_eq!(share.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_open_errors() {
        let share = MemoryShare::builder("smb://localhost")
            .file("smb://localhost/public/f", vec![1, 2, 3])
            .other("smb://localhost/public/link")
            .fail_open(
                "smb://localhost/public/locked/",
                SessionError::PermissionDenied {
                    path: "smb://localhost/public/locked/".into(),
                },
            )
            .build();
        let session = share.connect(0).await.unwrap();

        assert!(matches!(
            session.open_directory("smb://localhost/public/f").await,
            Err(SessionError::NotADirectory { .. })
        ));
        assert!(matches!(
            session.open_directory("smb://localhost/missing/").await,
            Err(SessionError::NotFound { .. })
        ));
        assert!(matches!(
            session.open_directory("smb://localhost/public/locked/").await,
            Err(SessionError::PermissionDenied { .. })
        ));
        assert!(matches!(
            session
                .open_file("smb://localhost/public/", OpenFlags::READ_ONLY)
                .await,
            Err(SessionError::IsADirectory { .. })
        ));
        assert!(matches!(
            session
                .open_file("smb://localhost/public/link", OpenFlags::READ_ONLY)
                .await,
            Err(SessionError::PermissionDenied { .. })
        ));
        assert_eq!(share.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_short_reads_and_end_of_stream() {
        let share = MemoryShare::builder("smb://localhost")
            .file("smb://localhost/public/f", vec![7u8; 10])
            .max_read(4)
            .build();
        let session = share.connect(0).await.unwrap();
        let mut file = session
            .open_file("smb://localhost/public/f", OpenFlags::READ_ONLY)
            .await
            .unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(file.read(&mut buf).await.unwrap(), ReadOutcome::Bytes(4));
        assert_eq!(file.read(&mut buf).await.unwrap(), ReadOutcome::Bytes(4));
        assert_eq!(file.read(&mut buf).await.unwrap(), ReadOutcome::Bytes(2));
        assert_eq!(file.read(&mut buf).await.unwrap(), ReadOutcome::EndOfStream);
        assert_eq!(file.read(&mut buf).await.unwrap(), ReadOutcome::EndOfStream);
        file.close().await.unwrap();
        assert_eq!(share.opened_files(), 1);
    }

    #[tokio::test]
    async fn test_closed_session_rejects_operations() {
        let share = MemoryShare::builder("smb://localhost")
            .dir("smb://localhost/public/")
            .build();
        let session = share.connect(5).await.unwrap();
        session.close().await.unwrap();
        session.close().await.unwrap();

        assert_eq!(
            session.open_directory("smb://localhost/public/").await.err(),
            Some(SessionError::Closed { id: 5 })
        );
        assert_eq!(share.closed_sessions(), 1);
    }
}
