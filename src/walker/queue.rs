//! Bounded work queue
//!
//! Jobs are pushed onto an unbounded channel and pulled by a single
//! dispatcher task, which takes a semaphore permit before spawning each
//! one. At most `max_in_flight` jobs run at once no matter how wide the
//! tree is.
//!
//! `pending` counts jobs that are queued or running, plus one for each
//! live [`SubmitGuard`]. A job adds its children before it subtracts
//! itself, so the count only reaches zero once no more work can appear.
//! The dispatcher exits at that point.

use crate::walker::walk::{Job, WalkContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, Semaphore};
use tracing::debug;

/// Submission side of the queue
#[derive(Clone)]
pub(crate) struct WorkQueue {
    tx: mpsc::UnboundedSender<Job>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl WorkQueue {
    pub(crate) fn new() -> (Self, mpsc::UnboundedReceiver<Job>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                pending: Arc::new(AtomicUsize::new(0)),
                idle: Arc::new(Notify::new()),
            },
            rx,
        )
    }

    /// Queue a job for the dispatcher
    pub(crate) fn submit(&self, job: Job) {
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(job).is_err() {
            // Dispatcher gone
            self.complete_one();
        }
    }

    fn complete_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_one();
        }
    }

    /// Hold the queue open until the returned guard is dropped
    pub(crate) fn guard(&self) -> SubmitGuard {
        self.pending.fetch_add(1, Ordering::SeqCst);
        SubmitGuard {
            queue: self.clone(),
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }
}

/// Keeps the dispatcher alive while more root jobs may be submitted
pub(crate) struct SubmitGuard {
    queue: WorkQueue,
}

impl Drop for SubmitGuard {
    fn drop(&mut self) {
        self.queue.complete_one();
    }
}

/// Dispatcher loop: run queued jobs under a permit until the queue drains
pub(crate) async fn dispatch(
    ctx: Arc<WalkContext>,
    queue: WorkQueue,
    mut rx: mpsc::UnboundedReceiver<Job>,
    max_in_flight: usize,
) {
    let semaphore = Arc::new(Semaphore::new(max_in_flight));
    debug!(max_in_flight, "Starting job dispatcher");

    loop {
        tokio::select! {
            biased;

            job = rx.recv() => {
                let Some(job) = job else { break };

                let permit = match Arc::clone(&semaphore).acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };

                let ctx = Arc::clone(&ctx);
                let queue = queue.clone();
                tokio::spawn(async move {
                    for child in ctx.run_job(job).await {
                        ctx.schedule(child);
                    }
                    drop(permit);
                    queue.complete_one();
                });
            }

            _ = queue.idle.notified() => {
                if queue.pending() == 0 {
                    break;
                }
            }
        }
    }

    debug!("Job dispatcher finished");
}
