//! Recursive share walker
//!
//! Every directory listed and every file read is one job. A directory job
//! opens a directory stream, classifies each entry and schedules one child
//! job per subdirectory or file. A drain job reads its file to
//! end-of-stream with a reusable buffer.
//!
//! Before a directory job schedules its children it sends a `Listed`
//! signal carrying how many it is about to schedule, so the aggregator
//! always hears about a job before it hears from it.
//!
//! Two scheduling modes:
//! - unbounded: each child is spawned as its own task immediately
//! - bounded: children go through a work queue whose dispatcher keeps at
//!   most `max_in_flight` jobs running (see `queue.rs`)

use crate::error::SessionResult;
use crate::smb::{Dirent, EntryKind, FileStream, OpenFlags, ReadOutcome, Session};
use crate::walker::aggregator::{CompletionSignal, SignalSender};
use crate::walker::queue::{self, SubmitGuard, WorkQueue};
use regex::Regex;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Options controlling one walk
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Read buffer size for drain jobs
    pub chunk_size: usize,

    /// Ceiling on running jobs (None = spawn every job immediately)
    pub max_in_flight: Option<usize>,

    /// Deepest directory level to descend into (root is 0)
    pub max_depth: Option<usize>,

    /// Paths matching any of these are neither listed nor read
    pub exclude_patterns: Vec<Regex>,
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            chunk_size: crate::config::DEFAULT_CHUNK_SIZE,
            max_in_flight: None,
            max_depth: None,
            exclude_patterns: Vec::new(),
        }
    }
}

impl WalkOptions {
    /// Check if a path should be excluded
    pub fn is_excluded(&self, path: &str) -> bool {
        self.exclude_patterns.iter().any(|re| re.is_match(path))
    }
}

/// What the walker does with one directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// "." or ".."
    Skip,
    /// Subdirectory: walk it
    Descend,
    /// Regular file: read it to the end
    Drain,
    /// Symlinks, devices and the like
    Ignore,
}

/// Classify a directory entry
pub fn classify(entry: &Dirent) -> Visit {
    if entry.is_special() {
        return Visit::Skip;
    }
    match entry.kind {
        EntryKind::Directory => Visit::Descend,
        EntryKind::File => Visit::Drain,
        EntryKind::Other => Visit::Ignore,
    }
}

/// Path of a subdirectory: `base` already ends in a separator
pub fn child_dir_path(base: &str, name: &str) -> String {
    let mut path = String::with_capacity(base.len() + name.len() + 1);
    path.push_str(base);
    path.push_str(name);
    path.push('/');
    path
}

/// Path of a file inside `base`
pub fn child_file_path(base: &str, name: &str) -> String {
    let mut path = String::with_capacity(base.len() + name.len());
    path.push_str(base);
    path.push_str(name);
    path
}

/// Kind of work a job does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Walk,
    Drain,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobKind::Walk => f.write_str("walk"),
            JobKind::Drain => f.write_str("drain"),
        }
    }
}

/// One unit of work against one session
#[derive(Clone)]
pub struct Job {
    pub session: Arc<dyn Session>,
    pub kind: JobKind,
    pub path: String,
    pub depth: usize,
}

impl Job {
    pub fn walk(session: Arc<dyn Session>, path: String, depth: usize) -> Self {
        Self {
            session,
            kind: JobKind::Walk,
            path,
            depth,
        }
    }

    pub fn drain(session: Arc<dyn Session>, path: String, depth: usize) -> Self {
        Self {
            session,
            kind: JobKind::Drain,
            path,
            depth,
        }
    }
}

/// Live counters shared by every job of a walk
#[derive(Debug, Default)]
pub struct WalkStats {
    pub dirs_listed: AtomicU64,
    pub files_drained: AtomicU64,
    pub bytes_read: AtomicU64,
    pub errors: AtomicU64,
    pub cancelled: AtomicU64,
    pub in_flight: AtomicU64,
}

impl WalkStats {
    pub fn record_dir(&self) {
        self.dirs_listed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_file(&self, bytes: u64) {
        self.files_drained.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    fn job_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    fn job_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Snapshot for progress display
    pub fn progress(&self, sessions: usize, elapsed: Duration) -> WalkProgress {
        WalkProgress {
            dirs: self.dirs_listed.load(Ordering::Relaxed),
            files: self.files_drained.load(Ordering::Relaxed),
            bytes: self.bytes_read.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            sessions,
            elapsed,
        }
    }
}

/// Progress information for display
#[derive(Debug, Clone, Default)]
pub struct WalkProgress {
    pub dirs: u64,
    pub files: u64,
    pub bytes: u64,
    pub errors: u64,
    pub in_flight: u64,
    pub sessions: usize,
    pub elapsed: Duration,
}

impl WalkProgress {
    pub fn files_per_second(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.files as f64 / secs
        } else {
            0.0
        }
    }
}

enum Scheduler {
    Spawn,
    Queue(WorkQueue),
}

/// State shared by every job of one walk
pub(crate) struct WalkContext {
    options: WalkOptions,
    signals: SignalSender,
    stats: Arc<WalkStats>,
    shutdown: Arc<AtomicBool>,
    scheduler: Scheduler,
}

impl WalkContext {
    /// Hand a job to the scheduler
    pub(crate) fn schedule(self: &Arc<Self>, job: Job) {
        match &self.scheduler {
            Scheduler::Spawn => {
                let ctx = Arc::clone(self);
                tokio::spawn(async move {
                    for child in ctx.run_job(job).await {
                        ctx.schedule(child);
                    }
                });
            }
            Scheduler::Queue(queue) => queue.submit(job),
        }
    }

    /// Run one job and return the children it discovered
    pub(crate) async fn run_job(&self, job: Job) -> Vec<Job> {
        self.stats.job_started();
        let children = if self.shutdown.load(Ordering::Relaxed) {
            debug!(kind = %job.kind, path = %job.path, "Shutdown requested, skipping job");
            self.stats.record_cancel();
            self.signals.send(CompletionSignal::Cancelled {
                path: job.path,
                kind: job.kind,
            });
            Vec::new()
        } else {
            match job.kind {
                JobKind::Walk => self.list_directory(&job.session, job.path, job.depth).await,
                JobKind::Drain => {
                    self.drain_job(job.session.as_ref(), job.path).await;
                    Vec::new()
                }
            }
        };
        self.stats.job_finished();
        children
    }

    async fn list_directory(&self, session: &Arc<dyn Session>, path: String, depth: usize) -> Vec<Job> {
        let session_id = session.id();
        debug!(session = session_id, path = %path, "Listing directory");

        let mut stream = match session.open_directory(&path).await {
            Ok(stream) => stream,
            Err(e) => {
                self.stats.record_error();
                if e.is_recoverable() {
                    debug!(session = session_id, path = %path, error = %e, "Cannot open directory");
                } else {
                    warn!(session = session_id, path = %path, error = %e, "Cannot open directory");
                }
                self.signals.send(CompletionSignal::ListFailed {
                    path,
                    reason: e.to_string(),
                    dirs: 0,
                    files: 0,
                });
                return Vec::new();
            }
        };

        let mut children = Vec::new();
        let mut dirs = 0u64;
        let mut files = 0u64;
        let mut failure = None;

        loop {
            let entry = match stream.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            match classify(&entry) {
                Visit::Skip | Visit::Ignore => {}
                Visit::Descend => {
                    let child = child_dir_path(&path, &entry.name);
                    let too_deep = self.options.max_depth.is_some_and(|max| depth + 1 > max);
                    if too_deep || self.options.is_excluded(&child) {
                        continue;
                    }
                    children.push(Job::walk(Arc::clone(session), child, depth + 1));
                    dirs += 1;
                }
                Visit::Drain => {
                    let child = child_file_path(&path, &entry.name);
                    if self.options.is_excluded(&child) {
                        continue;
                    }
                    children.push(Job::drain(Arc::clone(session), child, depth + 1));
                    files += 1;
                }
            }
        }

        if let Err(e) = stream.close().await {
            debug!(session = session_id, path = %path, error = %e, "Closing directory failed");
        }

        let signal = match failure {
            None => {
                self.stats.record_dir();
                debug!(session = session_id, path = %path, dirs, files, "Directory listed");
                CompletionSignal::Listed { path, dirs, files }
            }
            Some(e) => {
                self.stats.record_error();
                warn!(session = session_id, path = %path, error = %e, dirs, files, "Listing stopped early");
                CompletionSignal::ListFailed {
                    path,
                    reason: e.to_string(),
                    dirs,
                    files,
                }
            }
        };
        self.signals.send(signal);
        children
    }

    async fn drain_job(&self, session: &dyn Session, path: String) {
        let session_id = session.id();
        let signal = match drain(session, &path, self.options.chunk_size, Some(&self.shutdown)).await {
            Ok(bytes) => {
                self.stats.record_file(bytes);
                debug!(session = session_id, path = %path, bytes, "File drained");
                CompletionSignal::Drained { path, bytes }
            }
            Err(DrainStop::Cancelled) => {
                self.stats.record_cancel();
                CompletionSignal::Cancelled {
                    path,
                    kind: JobKind::Drain,
                }
            }
            Err(DrainStop::Failed(e)) => {
                self.stats.record_error();
                if e.is_recoverable() {
                    debug!(session = session_id, path = %path, error = %e, "Drain failed");
                } else {
                    warn!(session = session_id, path = %path, error = %e, "Drain failed");
                }
                CompletionSignal::DrainFailed {
                    path,
                    reason: e.to_string(),
                }
            }
        };
        self.signals.send(signal);
    }
}

enum DrainStop {
    Failed(crate::error::SessionError),
    Cancelled,
}

async fn read_to_end(
    file: &mut dyn FileStream,
    buf: &mut [u8],
    shutdown: Option<&AtomicBool>,
) -> Result<u64, DrainStop> {
    let mut total = 0u64;
    loop {
        if shutdown.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(DrainStop::Cancelled);
        }
        match file.read(buf).await.map_err(DrainStop::Failed)? {
            ReadOutcome::Bytes(n) => total += n as u64,
            ReadOutcome::EndOfStream => return Ok(total),
        }
    }
}

async fn drain(
    session: &dyn Session,
    path: &str,
    chunk_size: usize,
    shutdown: Option<&AtomicBool>,
) -> Result<u64, DrainStop> {
    let mut file = session
        .open_file(path, OpenFlags::READ_ONLY)
        .await
        .map_err(DrainStop::Failed)?;

    let mut buf = vec![0u8; chunk_size.max(1)];
    let result = read_to_end(file.as_mut(), &mut buf, shutdown).await;

    // The handle is released on every path, read errors included
    let closed = file.close().await;
    let total = result?;
    closed.map_err(DrainStop::Failed)?;
    Ok(total)
}

/// Read the file at `path` to end-of-stream and return its byte count
pub async fn drain_file(session: &dyn Session, path: &str, chunk_size: usize) -> SessionResult<u64> {
    match drain(session, path, chunk_size, None).await {
        Ok(total) => Ok(total),
        Err(DrainStop::Failed(e)) => Err(e),
        Err(DrainStop::Cancelled) => unreachable!("drain without a shutdown flag cannot be cancelled"),
    }
}

/// Schedules walk and drain jobs
///
/// In bounded mode the queue dispatcher runs until this walker is dropped
/// and every job it led to has finished. The completion channel closes only
/// once the walker, the dispatcher and every job are gone, so drop the
/// walker before waiting on the aggregator.
pub struct Walker {
    ctx: Arc<WalkContext>,
    _guard: Option<SubmitGuard>,
}

impl Walker {
    /// Create a walker reporting to `signals`
    pub fn new(options: WalkOptions, signals: SignalSender) -> Self {
        Self::with_state(
            options,
            signals,
            Arc::new(AtomicBool::new(false)),
            Arc::new(WalkStats::default()),
        )
    }

    /// Create a walker sharing an external shutdown flag and counters
    ///
    /// Bounded mode spawns the dispatcher here, so in that mode this must
    /// run inside a tokio runtime.
    pub fn with_state(
        options: WalkOptions,
        signals: SignalSender,
        shutdown: Arc<AtomicBool>,
        stats: Arc<WalkStats>,
    ) -> Self {
        match options.max_in_flight {
            None => Self {
                ctx: Arc::new(WalkContext {
                    options,
                    signals,
                    stats,
                    shutdown,
                    scheduler: Scheduler::Spawn,
                }),
                _guard: None,
            },
            Some(limit) => {
                let (queue, receiver) = WorkQueue::new();
                let guard = queue.guard();
                let ctx = Arc::new(WalkContext {
                    options,
                    signals,
                    stats,
                    shutdown,
                    scheduler: Scheduler::Queue(queue.clone()),
                });
                tokio::spawn(queue::dispatch(Arc::clone(&ctx), queue, receiver, limit.max(1)));
                Self {
                    ctx,
                    _guard: Some(guard),
                }
            }
        }
    }

    /// Get shutdown flag for signal handlers
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.ctx.shutdown)
    }

    /// Live counters for this walk
    pub fn stats(&self) -> Arc<WalkStats> {
        Arc::clone(&self.ctx.stats)
    }

    /// Walk `base_dir` (ending in a separator) on `session`
    ///
    /// Jobs are started with `tokio::spawn` in both modes, so this panics
    /// when called outside a tokio runtime.
    pub fn walk(&self, session: Arc<dyn Session>, base_dir: impl Into<String>) {
        self.ctx.schedule(Job::walk(session, base_dir.into(), 0));
    }

    /// Read one file on `session`
    ///
    /// Like [`Walker::walk`], must be called inside a tokio runtime.
    pub fn drain(&self, session: Arc<dyn Session>, path: impl Into<String>) {
        self.ctx.schedule(Job::drain(session, path.into(), 0));
    }
}

/// Walk `base_dir` with unbounded fan-out, reporting to `signals`
///
/// Must be called inside a tokio runtime.
pub fn walk(session: Arc<dyn Session>, base_dir: impl Into<String>, signals: SignalSender) {
    Walker::new(WalkOptions::default(), signals).walk(session, base_dir);
}
