//! Walk coordinator - runs one walk per session and waits for completion
//!
//! The coordinator connects `session_count` independent sessions, starts a
//! walk of the same root on each, waits on the completion aggregator and
//! closes every session afterwards, whatever the outcome.

use crate::config::WalkConfig;
use crate::error::{Result, WalkerError};
use crate::smb::{Connector, SerializedSession, Session};
use crate::walker::aggregator::{completion_channel, CompletionSummary, Failure};
use crate::walker::walk::{WalkStats, Walker};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Result of a completed walk
#[derive(Debug, Clone)]
pub struct WalkResult {
    pub sessions: usize,
    pub summary: CompletionSummary,
    pub duration: Duration,
    /// False if the walk was interrupted
    pub completed: bool,
}

impl WalkResult {
    pub fn dirs_listed(&self) -> u64 {
        self.summary.listed
    }

    pub fn files_drained(&self) -> u64 {
        self.summary.drained
    }

    pub fn bytes(&self) -> u64 {
        self.summary.bytes
    }

    pub fn failures(&self) -> &[Failure] {
        &self.summary.failures
    }

    pub fn files_per_second(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.summary.drained as f64 / secs
        } else {
            0.0
        }
    }
}

/// Walk coordinator
pub struct WalkCoordinator {
    config: Arc<WalkConfig>,
    connector: Arc<dyn Connector>,
    shutdown: Arc<AtomicBool>,
    stats: Arc<WalkStats>,
}

impl WalkCoordinator {
    /// Create a new coordinator
    pub fn new(config: WalkConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config: Arc::new(config),
            connector,
            shutdown: Arc::new(AtomicBool::new(false)),
            stats: Arc::new(WalkStats::default()),
        }
    }

    /// Get shutdown flag for signal handlers
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Live counters for progress reporting
    pub fn stats(&self) -> Arc<WalkStats> {
        Arc::clone(&self.stats)
    }

    /// Connect every session, closing the ones already open on failure
    async fn connect_all(&self) -> Result<Vec<Arc<dyn Session>>> {
        let mut sessions = Vec::with_capacity(self.config.session_count);
        for id in 0..self.config.session_count {
            match self.connector.connect(id).await {
                Ok(session) => {
                    let session = if self.config.serialize_sessions {
                        Arc::new(SerializedSession::new(session))
                    } else {
                        SerializedSession::wrap_if_needed(session)
                    };
                    sessions.push(session);
                }
                Err(e) => {
                    warn!(session = id, error = %e, "Failed to open session");
                    close_all(&sessions).await;
                    return Err(e.into());
                }
            }
        }
        Ok(sessions)
    }

    /// Run the walk to completion
    pub async fn run(&self) -> Result<WalkResult> {
        let start_time = Instant::now();
        let start_datetime: DateTime<Utc> = Utc::now();
        let root = self.config.url.walk_root();

        info!(
            url = %self.config.url.to_display_string(),
            server = self.connector.server(),
            sessions = self.config.session_count,
            max_in_flight = ?self.config.max_in_flight,
            "Starting share walk"
        );
        debug!(start_time = %start_datetime.to_rfc3339(), "Walk started");

        let sessions = self.connect_all().await?;

        let (signals, mut aggregator) = completion_channel();
        let walker = Walker::with_state(
            self.config.walk_options(),
            signals,
            Arc::clone(&self.shutdown),
            Arc::clone(&self.stats),
        );
        for session in &sessions {
            walker.walk(Arc::clone(session), root.clone());
        }
        // The walker holds a sender; the channel must be able to close
        drop(walker);

        let wait = async {
            match self.config.expected_files {
                Some(expected) => aggregator.wait_for(expected).await,
                None => aggregator.wait_until_settled(sessions.len() as u64).await,
            }
        };
        let outcome = match self.config.wait_timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .unwrap_or(Err(WalkerError::Timeout(limit))),
            None => wait.await,
        };

        close_all(&sessions).await;
        let summary = outcome?;
        let duration = start_time.elapsed();
        let completed = !self.shutdown.load(Ordering::Relaxed);

        info!(
            dirs = summary.listed,
            files = summary.drained,
            bytes = summary.bytes,
            failed = summary.failed(),
            cancelled = summary.cancelled(),
            duration_secs = duration.as_secs(),
            "Share walk completed"
        );

        Ok(WalkResult {
            sessions: sessions.len(),
            summary,
            duration,
            completed,
        })
    }
}

async fn close_all(sessions: &[Arc<dyn Session>]) {
    for session in sessions {
        if let Err(e) = session.close().await {
            warn!(session = session.id(), error = %e, "Failed to close session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ShareUrl;
    use crate::error::SessionError;
    use crate::smb::MemoryShare;

    fn tree(dirs: usize, files: usize, size: usize) -> MemoryShare {
        let mut builder = MemoryShare::builder("smb://localhost");
        for d in 0..dirs {
            for f in 0..files {
                builder = builder.file(format!("smb://localhost/public/{}/{}", d, f), vec![7u8; size]);
            }
        }
        builder.build()
    }

    fn config(sessions: usize) -> WalkConfig {
        let mut config = WalkConfig::new(ShareUrl::parse("smb://localhost/public/").unwrap());
        config.session_count = sessions;
        config
    }

    #[tokio::test]
    async fn test_run_settles_and_closes_sessions() {
        let share = Arc::new(tree(2, 3, 10));
        let coordinator = WalkCoordinator::new(config(2), share.clone());

        let result = coordinator.run().await.unwrap();
        assert!(result.completed);
        assert_eq!(result.sessions, 2);
        assert_eq!(result.files_drained(), 12);
        assert_eq!(result.bytes(), 120);
        assert_eq!(result.dirs_listed(), 6);
        assert!(result.summary.all_succeeded());
        assert_eq!(share.closed_sessions(), 2);
        assert_eq!(share.open_handles(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_closes_opened_sessions() {
        struct FlakyConnector {
            share: MemoryShare,
        }

        #[async_trait::async_trait]
        impl Connector for FlakyConnector {
            fn server(&self) -> &str {
                "smb://localhost"
            }

            async fn connect(&self, session_id: usize) -> crate::error::SessionResult<Arc<dyn Session>> {
                if session_id == 2 {
                    return Err(SessionError::ConnectionFailed {
                        server: "localhost".into(),
                        reason: "refused".into(),
                    });
                }
                self.share.connect(session_id).await
            }
        }

        let share = tree(1, 1, 1);
        let connector = Arc::new(FlakyConnector { share: share.clone() });
        let err = WalkCoordinator::new(config(4), connector).run().await.unwrap_err();

        assert!(matches!(
            err,
            WalkerError::Session(SessionError::ConnectionFailed { .. })
        ));
        assert_eq!(share.sessions(), 2);
        assert_eq!(share.closed_sessions(), 2);
    }

    #[tokio::test]
    async fn test_interrupted_walk_reports_incomplete() {
        let share = Arc::new(tree(2, 2, 1));
        let coordinator = WalkCoordinator::new(config(1), share.clone());
        coordinator.shutdown_flag().store(true, Ordering::SeqCst);

        let result = coordinator.run().await.unwrap();
        assert!(!result.completed);
        assert_eq!(result.summary.cancelled_dirs, 1);
        assert_eq!(share.opened_files(), 0);
    }

    #[tokio::test]
    async fn test_wrong_expected_count_is_an_error() {
        let share = Arc::new(tree(1, 2, 1));
        let mut config = config(1);
        config.expected_files = Some(3);

        let err = WalkCoordinator::new(config, share).run().await.unwrap_err();
        assert!(matches!(
            err,
            WalkerError::Incomplete {
                received: 2,
                expected: 3
            }
        ));
    }
}
