//! Job queue and worker loop.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::job::Job;

/// Result of one job delivery.
#[derive(Debug)]
pub enum JobOutcome {
    /// Job finished (including "stale, nothing to do").
    Done,
    /// Re-enqueue this payload after the delay.
    Retry { job: Job, after: Duration },
    /// Out of budget or unrecoverable; logged and dropped.
    Failed { reason: String },
}

/// Executes one job. Implementations dispatch on the payload variant and
/// must be safe to call concurrently and for replayed payloads.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn run(&self, job: Job) -> JobOutcome;
}

/// Sending half; cheap to clone and hand to anything that schedules work.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl JobQueue {
    /// Enqueue for immediate delivery. A send after the runner has shut
    /// down is dropped; by then nothing will act on it anyway.
    pub fn enqueue(&self, job: Job) {
        debug!(kind = job.kind(), "enqueue job");
        if self.tx.send(job).is_err() {
            warn!("job queue closed, dropping job");
        }
    }

    /// Enqueue after a delay. The timer runs on the current runtime; the
    /// job lands on the same queue as immediate enqueues.
    pub fn enqueue_after(&self, job: Job, delay: Duration) {
        debug!(kind = job.kind(), delay_ms = delay.as_millis() as u64, "enqueue delayed job");
        let tx = self.tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if tx.send(job).is_err() {
                warn!("job queue closed, dropping delayed job");
            }
        });
    }
}

/// Receiving half; owns the channel and drives deliveries to a handler.
pub struct JobRunner {
    rx: mpsc::UnboundedReceiver<Job>,
}

/// Create a connected queue/runner pair.
pub fn job_queue() -> (JobQueue, JobRunner) {
    let (tx, rx) = mpsc::unbounded_channel();
    (JobQueue { tx }, JobRunner { rx })
}

impl JobRunner {
    /// Receive the next job without running the dispatch loop. For callers
    /// that drive deliveries themselves, tests included.
    pub async fn next(&mut self) -> Option<Job> {
        self.rx.recv().await
    }

    /// Drain the queue until `shutdown` flips true.
    ///
    /// Each job runs on its own task so a slow provider call never blocks
    /// the rest of the queue; serialization where it matters is the lock
    /// manager's responsibility inside the handler.
    pub async fn run(
        mut self,
        handler: Arc<dyn JobHandler>,
        queue: JobQueue,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("job runner started");
        loop {
            tokio::select! {
                maybe_job = self.rx.recv() => {
                    let Some(job) = maybe_job else {
                        info!("job queue closed, runner exiting");
                        return;
                    };
                    let handler = Arc::clone(&handler);
                    let queue = queue.clone();
                    tokio::spawn(async move {
                        let kind = job.kind();
                        match handler.run(job).await {
                            JobOutcome::Done => {
                                debug!(kind, "job done");
                            }
                            JobOutcome::Retry { job, after } => {
                                debug!(kind, after_ms = after.as_millis() as u64, "job retry scheduled");
                                queue.enqueue_after(job, after);
                            }
                            JobOutcome::Failed { reason } => {
                                error!(kind, %reason, "job failed");
                            }
                        }
                    });
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("shutdown requested, job runner exiting");
                        return;
                    }
                }
            }
        }
    }
}
