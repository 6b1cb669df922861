//! Interval-based poll job dispatch.
//!
//! The scheduler resolves the configuration snapshot into per-device
//! schedule entries and fires each device's pre-resolved jobs into the
//! worker pool at the configured cadence. It never blocks on downstream
//! backpressure: a full job queue drops the individual job with a warning
//! so the timer loop stays on schedule.

mod resolve;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use resolve::resolve_jobs;

use crate::config::Snapshot;
use crate::poll::{JobSubmitter, PollJob};

/// How long to sleep when there is nothing to schedule, so a reload can
/// introduce entries without waking the loop explicitly.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Next-fire bookkeeping for one device.
struct Entry {
    hostname: String,
    interval: Duration,
    next_fire: Instant,
    jobs: Vec<PollJob>,
}

/// Dispatches [`PollJob`]s into a [`JobSubmitter`] at each device's
/// configured interval.
pub struct Scheduler {
    submitter: Arc<dyn JobSubmitter>,
    entries: Mutex<Vec<Entry>>,
}

impl Scheduler {
    /// Builds the schedule from `snapshot`. Nothing runs until
    /// [`run`](Self::run) is called.
    pub fn new(snapshot: &Snapshot, submitter: Arc<dyn JobSubmitter>) -> Self {
        Self {
            submitter,
            entries: Mutex::new(build_entries(snapshot)),
        }
    }

    /// Runs the scheduling loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            let deadline = {
                let mut entries = self.entries.lock().unwrap();
                if entries.is_empty() {
                    None
                } else {
                    entries.sort_by_key(|e| e.next_fire);
                    Some(entries[0].next_fire)
                }
            };

            let sleep_until = match deadline {
                None => Instant::now() + IDLE_POLL,
                Some(at) => at,
            };

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(sleep_until) => {}
            }

            let now = Instant::now();
            let mut entries = self.entries.lock().unwrap();
            for entry in entries.iter_mut() {
                if entry.next_fire > now {
                    continue;
                }
                self.fire(entry);
                entry.next_fire = now + entry.interval;
            }
        }
    }

    /// Atomically replaces the schedule with one built from `snapshot`.
    ///
    /// Added devices poll immediately; removed devices stop; changed
    /// intervals take effect on the next advance. Safe to call from
    /// multiple tasks concurrently.
    pub fn reload(&self, snapshot: &Snapshot) {
        let new_entries = build_entries(snapshot);
        let count = new_entries.len();
        *self.entries.lock().unwrap() = new_entries;
        info!(devices = count, "scheduler: config reloaded");
    }

    /// Number of active schedule entries (for monitoring and tests).
    pub fn entries(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn fire(&self, entry: &Entry) {
        for job in &entry.jobs {
            if !self.submitter.try_submit(job.clone()) {
                warn!(
                    hostname = %entry.hostname,
                    object = %job.object.key,
                    "scheduler: job queue full, dropping job"
                );
            }
        }
        debug!(hostname = %entry.hostname, count = entry.jobs.len(), "scheduler: fired jobs");
    }
}

/// Resolves the hierarchy and creates one entry per device, each firing
/// immediately on start or reload.
fn build_entries(snapshot: &Snapshot) -> Vec<Entry> {
    let mut by_host: HashMap<String, Vec<PollJob>> = HashMap::new();
    for job in resolve_jobs(snapshot) {
        by_host.entry(job.hostname.clone()).or_default().push(job);
    }

    let now = Instant::now();
    by_host
        .into_iter()
        .filter(|(_, jobs)| !jobs.is_empty())
        .map(|(hostname, jobs)| {
            let seconds = jobs[0].device_config.poll_interval;
            let interval = if seconds == 0 {
                Duration::from_secs(60)
            } else {
                Duration::from_secs(seconds)
            };
            Entry {
                hostname,
                interval,
                next_fire: now,
                jobs,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poll::BoxFuture;

    /// Records every submitted job; optionally rejects all submissions.
    struct RecordingSubmitter {
        submitted: Mutex<Vec<(String, String)>>,
        accept: bool,
    }

    impl RecordingSubmitter {
        fn new(accept: bool) -> Arc<Self> {
            Arc::new(Self {
                submitted: Mutex::new(Vec::new()),
                accept,
            })
        }

        fn submitted(&self) -> Vec<(String, String)> {
            self.submitted.lock().unwrap().clone()
        }
    }

    impl JobSubmitter for RecordingSubmitter {
        fn submit(&self, job: PollJob) -> BoxFuture<'_, bool> {
            let ok = self.try_submit(job);
            Box::pin(async move { ok })
        }

        fn try_submit(&self, job: PollJob) -> bool {
            if self.accept {
                self.submitted
                    .lock()
                    .unwrap()
                    .push((job.hostname.clone(), job.object.key.clone()));
            }
            self.accept
        }
    }

    fn snapshot() -> Snapshot {
        resolve::tests::snapshot()
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_dispatch_is_immediate() {
        let submitter = RecordingSubmitter::new(true);
        let sched = Arc::new(Scheduler::new(&snapshot(), submitter.clone()));
        assert_eq!(sched.entries(), 2);

        let cancel = CancellationToken::new();
        let run = {
            let sched = Arc::clone(&sched);
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
        run.await.unwrap();

        let submitted = submitter.submitted();
        // sw-a has two deduplicated objects, sw-b one.
        assert_eq!(submitted.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_redispatch() {
        let submitter = RecordingSubmitter::new(true);
        let sched = Arc::new(Scheduler::new(&snapshot(), submitter.clone()));
        let cancel = CancellationToken::new();
        let run = {
            let sched = Arc::clone(&sched);
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };

        // Interval is 60 s; two full intervals pass.
        tokio::time::sleep(Duration::from_secs(121)).await;
        cancel.cancel();
        run.await.unwrap();

        let count = submitter.submitted().len();
        assert!(count >= 9, "expected 3 rounds of 3 jobs, got {count}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_adds_and_removes_devices() {
        let submitter = RecordingSubmitter::new(true);
        let sched = Arc::new(Scheduler::new(&snapshot(), submitter.clone()));
        let cancel = CancellationToken::new();
        let run = {
            let sched = Arc::clone(&sched);
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;

        // Drop sw-b, add sw-c; the new device fires without waiting a full
        // interval.
        let mut snap = snapshot();
        snap.devices.remove("sw-b");
        snap.devices.insert(
            "sw-c".into(),
            resolve::tests::device("10.0.0.9", &["switches"]),
        );
        sched.reload(&snap);
        assert_eq!(sched.entries(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        let after_reload: Vec<_> = submitter.submitted();
        assert!(after_reload.iter().any(|(h, _)| h == "sw-c"));

        // No further sw-b dispatches after the reload point.
        let sw_b_total = after_reload.iter().filter(|(h, _)| h == "sw-b").count();
        tokio::time::sleep(Duration::from_secs(120)).await;
        let sw_b_later = submitter
            .submitted()
            .iter()
            .filter(|(h, _)| h == "sw-b")
            .count();
        assert_eq!(sw_b_total, sw_b_later);

        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_without_blocking() {
        let submitter = RecordingSubmitter::new(false);
        let sched = Arc::new(Scheduler::new(&snapshot(), submitter));
        let cancel = CancellationToken::new();
        let run = {
            let sched = Arc::clone(&sched);
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };
        // The loop keeps turning even though every submit is rejected.
        tokio::time::sleep(Duration::from_secs(180)).await;
        cancel.cancel();
        run.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_schedule_idles_until_reload() {
        let submitter = RecordingSubmitter::new(true);
        let sched = Arc::new(Scheduler::new(&Snapshot::default(), submitter.clone()));
        assert_eq!(sched.entries(), 0);

        let cancel = CancellationToken::new();
        let run = {
            let sched = Arc::clone(&sched);
            let cancel = cancel.clone();
            tokio::spawn(async move { sched.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(submitter.submitted().is_empty());

        sched.reload(&snapshot());
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(!submitter.submitted().is_empty());

        cancel.cancel();
        run.await.unwrap();
    }
}
