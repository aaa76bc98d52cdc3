//! Completion aggregation
//!
//! Every job sends exactly one [`CompletionSignal`] when it finishes. The
//! aggregator owns the receiving end of an unbounded channel and tallies
//! them into a [`CompletionSummary`].
//!
//! There are two ways to wait:
//! - [`CompletionAggregator::wait_for`] returns once exactly K file signals
//!   have arrived, for callers that know the tree shape in advance
//! - [`CompletionAggregator::wait_until_settled`] uses the child counts each
//!   directory job reports to know when no job is left

use crate::error::{Result, WalkerError};
use crate::walker::walk::JobKind;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Outcome of one walk or drain job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSignal {
    /// A file was read to end-of-stream
    Drained { path: String, bytes: u64 },

    /// A file could not be opened or read
    DrainFailed { path: String, reason: String },

    /// A directory was listed; `dirs` and `files` jobs were scheduled
    Listed { path: String, dirs: u64, files: u64 },

    /// A directory could not be opened or its listing broke off.
    /// Entries seen before the failure were still scheduled.
    ListFailed {
        path: String,
        reason: String,
        dirs: u64,
        files: u64,
    },

    /// The job was skipped or stopped because of shutdown
    Cancelled { path: String, kind: JobKind },
}

impl CompletionSignal {
    pub fn path(&self) -> &str {
        match self {
            CompletionSignal::Drained { path, .. }
            | CompletionSignal::DrainFailed { path, .. }
            | CompletionSignal::Listed { path, .. }
            | CompletionSignal::ListFailed { path, .. }
            | CompletionSignal::Cancelled { path, .. } => path,
        }
    }

    /// Number of jobs this signal announces
    pub fn scheduled(&self) -> u64 {
        match self {
            CompletionSignal::Listed { dirs, files, .. }
            | CompletionSignal::ListFailed { dirs, files, .. } => dirs + files,
            _ => 0,
        }
    }
}

/// A failed job, kept for the final report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub path: String,
    pub reason: String,
}

/// Tally of every signal received so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletionSummary {
    pub drained: u64,
    pub drain_failed: u64,
    pub bytes: u64,
    pub listed: u64,
    pub list_failed: u64,
    pub cancelled_files: u64,
    pub cancelled_dirs: u64,
    pub failures: Vec<Failure>,
}

impl CompletionSummary {
    fn record(&mut self, signal: &CompletionSignal) {
        match signal {
            CompletionSignal::Drained { bytes, .. } => {
                self.drained += 1;
                self.bytes += bytes;
            }
            CompletionSignal::DrainFailed { path, reason } => {
                self.drain_failed += 1;
                self.failures.push(Failure {
                    path: path.clone(),
                    reason: reason.clone(),
                });
            }
            CompletionSignal::Listed { .. } => self.listed += 1,
            CompletionSignal::ListFailed { path, reason, .. } => {
                self.list_failed += 1;
                self.failures.push(Failure {
                    path: path.clone(),
                    reason: reason.clone(),
                });
            }
            CompletionSignal::Cancelled { kind, .. } => match kind {
                JobKind::Drain => self.cancelled_files += 1,
                JobKind::Walk => self.cancelled_dirs += 1,
            },
        }
    }

    /// Signals that ended drain jobs, whatever their outcome
    pub fn file_signals(&self) -> u64 {
        self.drained + self.drain_failed + self.cancelled_files
    }

    /// Every signal received
    pub fn total_signals(&self) -> u64 {
        self.file_signals() + self.listed + self.list_failed + self.cancelled_dirs
    }

    pub fn failed(&self) -> u64 {
        self.drain_failed + self.list_failed
    }

    pub fn cancelled(&self) -> u64 {
        self.cancelled_files + self.cancelled_dirs
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0 && self.cancelled() == 0
    }
}

/// Sending half handed to every job
#[derive(Debug, Clone)]
pub struct SignalSender {
    tx: mpsc::UnboundedSender<CompletionSignal>,
}

impl SignalSender {
    /// Deliver a signal; never blocks
    pub fn send(&self, signal: CompletionSignal) {
        trace!(path = signal.path(), "Completion signal");
        if let Err(e) = self.tx.send(signal) {
            debug!(path = e.0.path(), "Aggregator gone, dropping completion signal");
        }
    }
}

/// Receiving half: counts signals until the walk is done
#[derive(Debug)]
pub struct CompletionAggregator {
    rx: mpsc::UnboundedReceiver<CompletionSignal>,
    summary: CompletionSummary,
}

/// Create a connected sender/aggregator pair
pub fn completion_channel() -> (SignalSender, CompletionAggregator) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        SignalSender { tx },
        CompletionAggregator {
            rx,
            summary: CompletionSummary::default(),
        },
    )
}

impl CompletionAggregator {
    /// Receive and record the next signal
    ///
    /// Returns `None` once every sender is gone and the channel is empty.
    pub async fn recv(&mut self) -> Option<CompletionSignal> {
        let signal = self.rx.recv().await?;
        self.summary.record(&signal);
        Some(signal)
    }

    /// Everything recorded so far
    pub fn summary(&self) -> &CompletionSummary {
        &self.summary
    }

    /// Block until exactly `expected_files` drain jobs have reported
    ///
    /// Directory signals arriving in between are recorded but not counted.
    /// Fails with `WalkerError::Incomplete` if every sender goes away first.
    pub async fn wait_for(&mut self, expected_files: u64) -> Result<CompletionSummary> {
        while self.summary.file_signals() < expected_files {
            if self.recv().await.is_none() {
                return Err(WalkerError::Incomplete {
                    received: self.summary.file_signals(),
                    expected: expected_files,
                });
            }
        }
        debug!(files = expected_files, "Expected file signals received");
        Ok(self.summary.clone())
    }

    /// Block until every job has reported
    ///
    /// `roots` is the number of jobs submitted directly through a walker;
    /// everything else is announced by the directory that found it.
    pub async fn wait_until_settled(&mut self, roots: u64) -> Result<CompletionSummary> {
        let mut outstanding = roots as i64;
        while outstanding > 0 {
            match self.recv().await {
                Some(signal) => outstanding += signal.scheduled() as i64 - 1,
                None => {
                    let received = self.summary.total_signals();
                    return Err(WalkerError::Incomplete {
                        received,
                        expected: received + outstanding as u64,
                    });
                }
            }
        }
        debug!(signals = self.summary.total_signals(), "Walk settled");
        Ok(self.summary.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn drained(path: &str, bytes: u64) -> CompletionSignal {
        CompletionSignal::Drained {
            path: path.into(),
            bytes,
        }
    }

    #[tokio::test]
    async fn test_wait_for_exact_count() {
        let (signals, mut aggregator) = completion_channel();
        for i in 0..5 {
            signals.send(drained(&format!("f{}", i), 10));
        }
        signals.send(CompletionSignal::Listed {
            path: "d/".into(),
            dirs: 0,
            files: 0,
        });

        let summary = aggregator.wait_for(5).await.unwrap();
        assert_eq!(summary.drained, 5);
        assert_eq!(summary.bytes, 50);

        // The sender is still alive, so a sixth file never arrives
        let pending = tokio::time::timeout(Duration::from_millis(50), aggregator.wait_for(6)).await;
        assert!(pending.is_err());
        drop(signals);
    }

    #[tokio::test]
    async fn test_wait_for_does_not_overconsume() {
        let (signals, mut aggregator) = completion_channel();
        signals.send(drained("a", 1));
        signals.send(drained("b", 1));
        signals.send(drained("c", 1));

        let summary = aggregator.wait_for(2).await.unwrap();
        assert_eq!(summary.drained, 2);
        assert_eq!(aggregator.recv().await, Some(drained("c", 1)));
    }

    #[tokio::test]
    async fn test_failures_count_toward_completion() {
        let (signals, mut aggregator) = completion_channel();
        signals.send(drained("a", 4));
        signals.send(CompletionSignal::DrainFailed {
            path: "b".into(),
            reason: "Permission denied: b".into(),
        });
        signals.send(CompletionSignal::Cancelled {
            path: "c".into(),
            kind: JobKind::Drain,
        });

        let summary = aggregator.wait_for(3).await.unwrap();
        assert_eq!(summary.drained, 1);
        assert_eq!(summary.drain_failed, 1);
        assert_eq!(summary.cancelled_files, 1);
        assert_eq!(summary.failures[0].path, "b");
        assert!(!summary.all_succeeded());
    }

    #[tokio::test]
    async fn test_wait_for_reports_incomplete() {
        let (signals, mut aggregator) = completion_channel();
        signals.send(drained("a", 1));
        drop(signals);

        let err = aggregator.wait_for(3).await.unwrap_err();
        assert!(matches!(
            err,
            WalkerError::Incomplete {
                received: 1,
                expected: 3
            }
        ));
    }

    #[tokio::test]
    async fn test_settled_follows_announced_children() {
        let (signals, mut aggregator) = completion_channel();
        signals.send(CompletionSignal::Listed {
            path: "r/".into(),
            dirs: 1,
            files: 1,
        });
        signals.send(drained("r/a", 2));
        signals.send(CompletionSignal::ListFailed {
            path: "r/d/".into(),
            reason: "broken".into(),
            dirs: 0,
            files: 1,
        });
        signals.send(drained("r/d/b", 3));

        let summary = aggregator.wait_until_settled(1).await.unwrap();
        assert_eq!(summary.listed, 1);
        assert_eq!(summary.list_failed, 1);
        assert_eq!(summary.drained, 2);
        assert_eq!(summary.bytes, 5);
        assert_eq!(summary.total_signals(), 4);
        drop(signals);
    }

    #[tokio::test]
    async fn test_settled_reports_missing_jobs() {
        let (signals, mut aggregator) = completion_channel();
        signals.send(CompletionSignal::Listed {
            path: "r/".into(),
            dirs: 0,
            files: 2,
        });
        signals.send(drained("r/a", 1));
        drop(signals);

        let err = aggregator.wait_until_settled(1).await.unwrap_err();
        assert!(matches!(
            err,
            WalkerError::Incomplete {
                received: 2,
                expected: 3
            }
        ));
    }

    #[test]
    fn test_signal_classification() {
        assert_eq!(drained("a", 0).scheduled(), 0);
        assert_eq!(drained("a", 0).path(), "a");
        assert_eq!(
            CompletionSignal::ListFailed {
                path: "d/".into(),
                reason: String::new(),
                dirs: 2,
                files: 3
            }
            .scheduled(),
            5
        );
    }
}
