//! Local directory share backend
//!
//! Serves local directories as shares of a single server, so the walker
//! can run against a real tree without a remote server. Share URLs are
//! resolved as `smb://<host>/<share>/<path>` where `<share>` is mapped to a
//! local directory. Listing the server root yields one directory entry per
//! mounted share.

use super::{Connector, DirectoryStream, Dirent, EntryKind, FileStream, OpenFlags, ReadOutcome, Session};
use crate::config::ShareUrl;
use crate::error::{SessionError, SessionResult};
use async_trait::async_trait;
use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::debug;

/// Where a share URL points on the local side
#[derive(Debug, PartialEq, Eq)]
enum Resolved {
    ServerRoot,
    Path(PathBuf),
}

/// A set of local directories exposed as shares of one server
#[derive(Debug, Clone)]
pub struct LocalShare {
    server: String,
    host: String,
    shares: Arc<BTreeMap<String, PathBuf>>,
}

impl LocalShare {
    /// Create a server named `host` with no shares
    pub fn new(host: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            server: format!("smb://{}", host),
            host,
            shares: Arc::new(BTreeMap::new()),
        }
    }

    /// Expose `dir` as share `name`
    pub fn mount(mut self, name: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Arc::make_mut(&mut self.shares).insert(name.into().to_lowercase(), dir.into());
        self
    }

    /// Build from a parsed URL and `NAME=DIR` mounts
    pub fn from_mounts(url: &ShareUrl, mounts: &[(String, PathBuf)]) -> Self {
        mounts
            .iter()
            .fold(Self::new(url.server.clone()), |share, (name, dir)| {
                share.mount(name.clone(), dir.clone())
            })
    }

    /// Map a walker path to the local side
    ///
    /// Paths are built by appending raw entry names, so everything after the
    /// share is split on '/' only and each component is taken verbatim.
    fn resolve(&self, path: &str) -> SessionResult<Resolved> {
        let rest = path.strip_prefix("smb://").ok_or_else(|| SessionError::InvalidUrl {
            url: path.to_string(),
            reason: "expected an smb:// path".to_string(),
        })?;
        let (authority, rest) = rest.split_once('/').unwrap_or((rest, ""));
        let host = authority.split_once(':').map_or(authority, |(host, _)| host);
        if !host.eq_ignore_ascii_case(&self.host) {
            return Err(SessionError::NotFound {
                path: path.to_string(),
            });
        }

        let mut segments = rest.split('/').filter(|s| !s.is_empty());
        let share = match segments.next() {
            Some(share) => share.to_lowercase(),
            None => return Ok(Resolved::ServerRoot),
        };
        let mut local = self
            .shares
            .get(&share)
            .cloned()
            .ok_or_else(|| SessionError::NotFound {
                path: path.to_string(),
            })?;

        for segment in segments {
            // Never step outside the mounted directory
            if segment == ".." || segment == "." {
                return Err(SessionError::PermissionDenied {
                    path: path.to_string(),
                });
            }
            local.push(segment);
        }
        Ok(Resolved::Path(local))
    }
}

#[async_trait]
impl Connector for LocalShare {
    fn server(&self) -> &str {
        &self.server
    }

    async fn connect(&self, session_id: usize) -> SessionResult<Arc<dyn Session>> {
        debug!(session = session_id, server = %self.server, "Opening local share session");
        Ok(Arc::new(LocalSession {
            id: session_id,
            share: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// One session against a [`LocalShare`]
pub struct LocalSession {
    id: usize,
    share: LocalShare,
    closed: AtomicBool,
}

impl LocalSession {
    fn check_open(&self) -> SessionResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            Err(SessionError::Closed { id: self.id })
        } else {
            Ok(())
        }
    }
}

async fn metadata(path: &str, local: &Path) -> SessionResult<std::fs::Metadata> {
    tokio::fs::metadata(local)
        .await
        .map_err(|e| SessionError::from_io(path, &e))
}

#[async_trait]
impl Session for LocalSession {
    fn id(&self) -> usize {
        self.id
    }

    async fn open_directory(&self, path: &str) -> SessionResult<Box<dyn DirectoryStream>> {
        self.check_open()?;
        let mut pending = VecDeque::from([
            Dirent::new(".", EntryKind::Directory),
            Dirent::new("..", EntryKind::Directory),
        ]);

        let local = match self.share.resolve(path)? {
            Resolved::ServerRoot => {
                pending.extend(
                    self.share
                        .shares
                        .keys()
                        .map(|name| Dirent::new(name.clone(), EntryKind::Directory)),
                );
                return Ok(Box::new(LocalDirectory {
                    path: path.to_string(),
                    pending,
                    read_dir: None,
                }));
            }
            Resolved::Path(local) => local,
        };

        if !metadata(path, &local).await?.is_dir() {
            return Err(SessionError::NotADirectory {
                path: path.to_string(),
            });
        }
        let read_dir = tokio::fs::read_dir(&local)
            .await
            .map_err(|e| SessionError::from_io(path, &e))?;

        Ok(Box::new(LocalDirectory {
            path: path.to_string(),
            pending,
            read_dir: Some(read_dir),
        }))
    }

    async fn open_file(&self, path: &str, _flags: OpenFlags) -> SessionResult<Box<dyn FileStream>> {
        self.check_open()?;
        let local = match self.share.resolve(path)? {
            Resolved::ServerRoot => {
                return Err(SessionError::IsADirectory {
                    path: path.to_string(),
                })
            }
            Resolved::Path(local) => local,
        };

        if metadata(path, &local).await?.is_dir() {
            return Err(SessionError::IsADirectory {
                path: path.to_string(),
            });
        }
        let file = tokio::fs::File::open(&local)
            .await
            .map_err(|e| SessionError::from_io(path, &e))?;

        Ok(Box::new(LocalFile {
            path: path.to_string(),
            file,
        }))
    }

    async fn close(&self) -> SessionResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct LocalDirectory {
    path: String,
    pending: VecDeque<Dirent>,
    read_dir: Option<tokio::fs::ReadDir>,
}

#[async_trait]
impl DirectoryStream for LocalDirectory {
    async fn next_entry(&mut self) -> SessionResult<Option<Dirent>> {
        if let Some(entry) = self.pending.pop_front() {
            return Ok(Some(entry));
        }
        let read_dir = match self.read_dir.as_mut() {
            Some(read_dir) => read_dir,
            None => return Ok(None),
        };

        let read_failed = |e: std::io::Error| SessionError::ReadDirFailed {
            path: self.path.clone(),
            reason: e.to_string(),
        };
        match read_dir.next_entry().await.map_err(read_failed)? {
            Some(entry) => {
                let file_type = entry.file_type().await.map_err(read_failed)?;
                Ok(Some(Dirent::new(
                    entry.file_name().to_string_lossy().into_owned(),
                    EntryKind::from_file_type(file_type),
                )))
            }
            None => {
                self.read_dir = None;
                Ok(None)
            }
        }
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        Ok(())
    }
}

struct LocalFile {
    path: String,
    file: tokio::fs::File,
}

#[async_trait]
impl FileStream for LocalFile {
    async fn read(&mut self, buf: &mut [u8]) -> SessionResult<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Bytes(0));
        }
        match self.file.read(buf).await {
            Ok(0) => Ok(ReadOutcome::EndOfStream),
            Ok(n) => Ok(ReadOutcome::Bytes(n)),
            Err(e) => Err(SessionError::ReadFailed {
                path: self.path.clone(),
                reason: e.to_string(),
            }),
        }
    }

    async fn close(self: Box<Self>) -> SessionResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        let share = LocalShare::new("localhost").mount("Public", "/srv/public");

        assert_eq!(
            share.resolve("smb://localhost").unwrap(),
            Resolved::ServerRoot
        );
        assert_eq!(
            share.resolve("smb://LOCALHOST/public/a/b.txt").unwrap(),
            Resolved::Path(PathBuf::from("/srv/public/a/b.txt"))
        );
        assert!(matches!(
            share.resolve("smb://localhost/private/"),
            Err(SessionError::NotFound { .. })
        ));
        assert!(matches!(
            share.resolve("smb://otherhost/public/"),
            Err(SessionError::NotFound { .. })
        ));
        assert!(matches!(
            share.resolve("smb://localhost/public/../etc/passwd"),
            Err(SessionError::PermissionDenied { .. })
        ));
        assert!(matches!(
            share.resolve("/srv/public/a"),
            Err(SessionError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_resolve_keeps_names_verbatim() {
        let share = LocalShare::new("localhost").mount("public", "/srv/public");

        for name in ["a\\b.bin", "line\nbreak.bin", "trailing ", " leading"] {
            let url = format!("smb://localhost:1445/public/dir/{}", name);
            assert_eq!(
                share.resolve(&url).unwrap(),
                Resolved::Path(PathBuf::from("/srv/public/dir").join(name))
            );
        }
    }

    #[tokio::test]
    async fn test_list_and_read() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("data.bin"), vec![0u8; 100]).unwrap();

        let share = LocalShare::new("localhost").mount("public", dir.path());
        let session = share.connect(0).await.unwrap();

        let mut stream = session
            .open_directory("smb://localhost/public/")
            .await
            .unwrap();
        let mut entries = Vec::new();
        while let Some(entry) = stream.next_entry().await.unwrap() {
            entries.push(entry);
        }
        assert_eq!(stream.next_entry().await.unwrap(), None);
        stream.close().await.unwrap();

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        assert_eq!(
            entries,
            vec![
                Dirent::new(".", EntryKind::Directory),
                Dirent::new("..", EntryKind::Directory),
                Dirent::new("data.bin", EntryKind::File),
                Dirent::new("sub", EntryKind::Directory),
            ]
        );

        let mut file = session
            .open_file("smb://localhost/public/data.bin", OpenFlags::READ_ONLY)
            .await
            .unwrap();
        let mut buf = [0u8; 30];
        let mut total = 0;
        loop {
            match file.read(&mut buf).await.unwrap() {
                ReadOutcome::Bytes(n) => total += n,
                ReadOutcome::EndOfStream => break,
            }
        }
        file.close().await.unwrap();
        assert_eq!(total, 100);

        assert!(matches!(
            session
                .open_file("smb://localhost/public/sub", OpenFlags::READ_ONLY)
                .await,
            Err(SessionError::IsADirectory { .. })
        ));
        assert!(matches!(
            session
                .open_directory("smb://localhost/public/data.bin")
                .await,
            Err(SessionError::NotADirectory { .. })
        ));
    }

    #[tokio::test]
    async fn test_server_root_lists_shares() {
        let share = LocalShare::new("localhost")
            .mount("public", "/srv/public")
            .mount("private", "/srv/private");
        let session = share.connect(0).await.unwrap();

        let mut stream = session.open_directory("smb://localhost").await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = stream.next_entry().await.unwrap() {
            names.push(entry.name);
        }
        stream.close().await.unwrap();
        assert_eq!(names, vec![".", "..", "private", "public"]);
    }
}
