//! Fan-out worker pool for poll jobs.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::decode::RawPollResult;
use crate::poll::session::BoxFuture;
use crate::poll::{PollJob, SnmpPoller};

/// The subset of [`WorkerPool`] consumed by the scheduler. A trait so tests
/// can observe dispatches without standing up real workers.
pub trait JobSubmitter: Send + Sync {
    /// Enqueues a job, waiting for queue space. Returns false if the pool
    /// has shut down.
    fn submit(&self, job: PollJob) -> BoxFuture<'_, bool>;

    /// Enqueues a job without blocking. Returns false when the queue is
    /// full, letting the caller drop or defer.
    fn try_submit(&self, job: PollJob) -> bool;
}

/// Fans poll jobs out to N worker tasks and feeds results into the raw
/// channel consumed by the decoder stage.
pub struct WorkerPool {
    jobs_tx: std::sync::Mutex<Option<mpsc::Sender<PollJob>>>,
    workers: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Creates the pool and launches `num_workers` tasks immediately.
    ///
    /// Workers run until `cancel` fires or [`stop`](Self::stop) closes the
    /// job queue. The raw-channel sender is dropped when every worker has
    /// exited, which cascades shutdown into the decoder stage.
    pub fn start(
        num_workers: usize,
        poller: Arc<SnmpPoller>,
        output: mpsc::Sender<RawPollResult>,
        cancel: CancellationToken,
    ) -> Self {
        let num_workers = if num_workers == 0 { 100 } else { num_workers };
        let (jobs_tx, jobs_rx) = mpsc::channel::<PollJob>(num_workers * 2);
        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));

        let workers = (0..num_workers)
            .map(|_| {
                let poller = Arc::clone(&poller);
                let output = output.clone();
                let jobs_rx = Arc::clone(&jobs_rx);
                let cancel = cancel.clone();
                tokio::spawn(worker_loop(poller, jobs_rx, output, cancel))
            })
            .collect();

        Self {
            jobs_tx: std::sync::Mutex::new(Some(jobs_tx)),
            workers: std::sync::Mutex::new(workers),
        }
    }

    /// Closes the job queue and waits for every worker to drain.
    /// Idempotent.
    pub async fn stop(&self) {
        drop(self.jobs_tx.lock().unwrap().take());
        let workers = std::mem::take(&mut *self.workers.lock().unwrap());
        for handle in workers {
            let _ = handle.await;
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<PollJob>> {
        self.jobs_tx.lock().unwrap().clone()
    }
}

impl JobSubmitter for WorkerPool {
    fn submit(&self, job: PollJob) -> BoxFuture<'_, bool> {
        let sender = self.sender();
        Box::pin(async move {
            match sender {
                Some(tx) => tx.send(job).await.is_ok(),
                None => false,
            }
        })
    }

    fn try_submit(&self, job: PollJob) -> bool {
        match self.sender() {
            Some(tx) => tx.try_send(job).is_ok(),
            None => false,
        }
    }
}

async fn worker_loop(
    poller: Arc<SnmpPoller>,
    jobs_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<PollJob>>>,
    output: mpsc::Sender<RawPollResult>,
    cancel: CancellationToken,
) {
    loop {
        let job = {
            let mut rx = jobs_rx.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => return,
                job = rx.recv() => job,
            }
        };
        let Some(job) = job else {
            return;
        };

        match poller.poll(&job).await {
            Ok(result) => {
                // Blocking send: overload propagates upstream to the
                // scheduler's try_submit instead of discarding work here.
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = output.send(result) => {
                        if sent.is_err() {
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                // Nothing came back; emitting an empty result would only
                // flood the decoder.
                warn!(
                    device = %job.hostname,
                    object = %job.object.key,
                    error = %e,
                    "poll failed"
                );
            }
        }
    }
}
