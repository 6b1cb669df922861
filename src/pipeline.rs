//! Pipeline wiring and lifecycle.
//!
//! Poll path:
//!
//! ```text
//! Scheduler → WorkerPool → [raw] → Decoder → [decoded] →
//! Producer → [metric] → Formatter → [formatted] → Transport
//! ```
//!
//! Trap path (parallel):
//!
//! ```text
//! TrapReceiver → [trap] → trap Formatter → [formatted] → Transport
//! ```
//!
//! Both paths converge on the shared formatted channel. Every channel is
//! bounded; shutdown cascades through sender drops: a stage's workers
//! exit when their input channel closes, which drops their output
//! senders, which closes the next channel. The formatted channel in
//! particular closes only once both the poll-format and trap-format
//! workers are gone, so the transport always drains everything.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Snapshot;
use crate::decode::Decoder;
use crate::error::Result;
use crate::format::Formatter;
use crate::model::Trap;
use crate::poll::{ConnectionPool, PoolOptions, SnmpPoller, WorkerPool};
use crate::produce::{MetricProducer, ProducerConfig};
use crate::schedule::Scheduler;
use crate::transport::Transport;
use crate::trap::{TrapReceiver, TrapReceiverConfig};

/// Top-level pipeline settings. Zero-valued worker counts and buffer
/// sizes fall back to the documented defaults.
pub struct PipelineConfig {
    /// Collector instance id for output metadata. Defaults to the host
    /// name.
    pub collector_id: String,
    pub poller_workers: usize,
    pub decoder_workers: usize,
    pub producer_workers: usize,
    pub formatter_workers: usize,
    pub transport_workers: usize,
    /// Capacity of each inter-stage channel.
    pub buffer_size: usize,
    pub pool: PoolOptions,
    pub trap_enabled: bool,
    pub trap: TrapReceiverConfig,
    pub enum_enabled: bool,
    pub counter_delta_enabled: bool,
    /// Counter series idle longer than this are purged.
    pub counter_purge_age: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            collector_id: String::new(),
            poller_workers: 500,
            decoder_workers: 100,
            producer_workers: 100,
            formatter_workers: 50,
            transport_workers: 50,
            buffer_size: 10_000,
            pool: PoolOptions::default(),
            trap_enabled: false,
            trap: TrapReceiverConfig::default(),
            enum_enabled: false,
            counter_delta_enabled: true,
            counter_purge_age: Duration::from_secs(3600),
        }
    }
}

impl PipelineConfig {
    fn normalized(mut self) -> Self {
        if self.collector_id.is_empty() {
            self.collector_id = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "snmp-collector".to_string());
        }
        let defaults = Self::default();
        if self.poller_workers == 0 {
            self.poller_workers = defaults.poller_workers;
        }
        if self.decoder_workers == 0 {
            self.decoder_workers = defaults.decoder_workers;
        }
        if self.producer_workers == 0 {
            self.producer_workers = defaults.producer_workers;
        }
        if self.formatter_workers == 0 {
            self.formatter_workers = defaults.formatter_workers;
        }
        if self.transport_workers == 0 {
            self.transport_workers = defaults.transport_workers;
        }
        if self.buffer_size == 0 {
            self.buffer_size = defaults.buffer_size;
        }
        self
    }
}

struct Running {
    scheduler: Arc<Scheduler>,
    scheduler_task: JoinHandle<()>,
    worker_pool: Arc<WorkerPool>,
    trap_receiver: Option<TrapReceiver>,
    conn_pool: Arc<ConnectionPool>,
    stage_tasks: Vec<JoinHandle<()>>,
}

/// The assembled collector pipeline. Create with [`Pipeline::new`], call
/// [`start`](Pipeline::start) with a configuration snapshot, and
/// [`stop`](Pipeline::stop) for a graceful drain.
pub struct Pipeline {
    cfg: PipelineConfig,
    formatter: Arc<dyn Formatter>,
    transport: Arc<dyn Transport>,
    cancel: CancellationToken,
    running: Option<Running>,
}

impl Pipeline {
    pub fn new(
        cfg: PipelineConfig,
        formatter: Arc<dyn Formatter>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            cfg: cfg.normalized(),
            formatter,
            transport,
            cancel: CancellationToken::new(),
            running: None,
        }
    }

    /// Constructs every stage and launches the pipeline against
    /// `snapshot`.
    ///
    /// A trap listener bind failure is logged and polling continues
    /// without traps; anything else that fails here is fatal to startup.
    pub async fn start(&mut self, snapshot: Snapshot) -> Result<()> {
        if self.running.is_some() {
            return Err(crate::error::Error::AlreadyRunning {
                component: "pipeline",
            });
        }

        let (raw_tx, raw_rx) = mpsc::channel(self.cfg.buffer_size);
        let (decoded_tx, decoded_rx) = mpsc::channel(self.cfg.buffer_size);
        let (metric_tx, metric_rx) = mpsc::channel(self.cfg.buffer_size);
        let (formatted_tx, formatted_rx) = mpsc::channel::<Vec<u8>>(self.cfg.buffer_size);

        let producer = Arc::new(MetricProducer::new(
            ProducerConfig {
                collector_id: self.cfg.collector_id.clone(),
                enum_enabled: self.cfg.enum_enabled,
                counter_delta_enabled: self.cfg.counter_delta_enabled,
            },
            Arc::clone(&snapshot.enums),
        ));
        let decoder = Arc::new(Decoder::new());

        let conn_pool = Arc::new(ConnectionPool::new(self.cfg.pool.clone()));
        let poller = Arc::new(SnmpPoller::new(Arc::clone(&conn_pool)));

        let mut stage_tasks = Vec::new();

        // Trap path first: whether it runs decides who holds formatted
        // senders.
        let trap_receiver = if self.cfg.trap_enabled {
            let receiver = TrapReceiver::new(self.cfg.trap.clone());
            match receiver.start(&self.cancel).await {
                Ok(()) => {
                    let trap_rx = receiver
                        .take_output()
                        .expect("fresh receiver always has an output");
                    stage_tasks.extend(self.spawn_trap_format_stage(trap_rx, formatted_tx.clone()));
                    Some(receiver)
                }
                Err(e) => {
                    error!(error = %e, "trap receiver failed to start, continuing without traps");
                    None
                }
            }
        } else {
            None
        };

        // Processing stages, transport last so it owns no senders.
        stage_tasks.extend(self.spawn_decode_stage(decoder, raw_rx, decoded_tx));
        stage_tasks.extend(self.spawn_produce_stage(producer.clone(), decoded_rx, metric_tx));
        stage_tasks.extend(self.spawn_format_stage(metric_rx, formatted_tx));
        stage_tasks.extend(self.spawn_transport_stage(formatted_rx));
        if let Some(purge) = self.spawn_counter_purge(&producer) {
            stage_tasks.push(purge);
        }

        let worker_pool = Arc::new(WorkerPool::start(
            self.cfg.poller_workers,
            poller,
            raw_tx,
            self.cancel.clone(),
        ));

        let scheduler = Arc::new(Scheduler::new(
            &snapshot,
            Arc::clone(&worker_pool) as Arc<dyn crate::poll::JobSubmitter>,
        ));
        let scheduler_task = {
            let scheduler = Arc::clone(&scheduler);
            let cancel = self.cancel.clone();
            tokio::spawn(async move { scheduler.run(cancel).await })
        };

        info!(
            collector_id = %self.cfg.collector_id,
            poller_workers = self.cfg.poller_workers,
            buffer_size = self.cfg.buffer_size,
            trap_enabled = trap_receiver.is_some(),
            schedule_entries = scheduler.entries(),
            "pipeline running"
        );

        self.running = Some(Running {
            scheduler,
            scheduler_task,
            worker_pool,
            trap_receiver,
            conn_pool,
            stage_tasks,
        });
        Ok(())
    }

    /// Atomically swaps in a new configuration snapshot. Live counter
    /// state and the enum registry stay as they are; retired devices age
    /// out through the purge timer.
    pub fn reload(&self, snapshot: &Snapshot) {
        if let Some(running) = &self.running {
            running.scheduler.reload(snapshot);
        }
    }

    /// Graceful shutdown: stop producing, then drain every stage in
    /// topological order before releasing the transport and the
    /// connection pool.
    pub async fn stop(&mut self) {
        info!("pipeline shutting down");
        self.cancel.cancel();

        let Some(running) = self.running.take() else {
            return;
        };

        let _ = running.scheduler_task.await;
        running.worker_pool.stop().await;
        if let Some(receiver) = &running.trap_receiver {
            receiver.stop().await;
        }
        for task in running.stage_tasks {
            let _ = task.await;
        }

        if let Err(e) = self.transport.close() {
            error!(error = %e, "transport close failed");
        }
        running.conn_pool.close();
        info!("pipeline shutdown complete");
    }

    /// Number of scheduled devices (for monitoring and tests).
    pub fn schedule_entries(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.scheduler.entries())
    }

    // ========================================================================
    // Stage spawns
    // ========================================================================

    fn spawn_decode_stage(
        &self,
        decoder: Arc<Decoder>,
        raw_rx: mpsc::Receiver<crate::decode::RawPollResult>,
        decoded_tx: mpsc::Sender<crate::decode::DecodedPollResult>,
    ) -> Vec<JoinHandle<()>> {
        spawn_stage(self.cfg.decoder_workers, raw_rx, move |raw| {
            let decoder = Arc::clone(&decoder);
            let decoded_tx = decoded_tx.clone();
            async move {
                let decoded = match decoder.decode(&raw) {
                    Ok(decoded) => decoded,
                    Err(partial) => {
                        warn!(
                            device = %raw.device.hostname,
                            object = %raw.object.key,
                            decoded_count = partial.partial.varbinds.len(),
                            error = %partial.error,
                            "decode error, forwarding partial result"
                        );
                        partial.partial
                    }
                };
                if decoded.varbinds.is_empty() {
                    return;
                }
                let _ = decoded_tx.send(decoded).await;
            }
        })
    }

    fn spawn_produce_stage(
        &self,
        producer: Arc<MetricProducer>,
        decoded_rx: mpsc::Receiver<crate::decode::DecodedPollResult>,
        metric_tx: mpsc::Sender<crate::model::MetricBatch>,
    ) -> Vec<JoinHandle<()>> {
        spawn_stage(self.cfg.producer_workers, decoded_rx, move |decoded| {
            let producer = Arc::clone(&producer);
            let metric_tx = metric_tx.clone();
            async move {
                let batch = producer.produce(&decoded);
                if batch.metrics.is_empty() {
                    return;
                }
                let _ = metric_tx.send(batch).await;
            }
        })
    }

    fn spawn_format_stage(
        &self,
        metric_rx: mpsc::Receiver<crate::model::MetricBatch>,
        formatted_tx: mpsc::Sender<Vec<u8>>,
    ) -> Vec<JoinHandle<()>> {
        let formatter = Arc::clone(&self.formatter);
        spawn_stage(self.cfg.formatter_workers, metric_rx, move |batch| {
            let formatter = Arc::clone(&formatter);
            let formatted_tx = formatted_tx.clone();
            async move {
                match formatter.format_batch(&batch) {
                    Ok(data) => {
                        let _ = formatted_tx.send(data).await;
                    }
                    Err(e) => {
                        warn!(device = %batch.device.hostname, error = %e, "format error");
                    }
                }
            }
        })
    }

    fn spawn_trap_format_stage(
        &self,
        trap_rx: mpsc::Receiver<Trap>,
        formatted_tx: mpsc::Sender<Vec<u8>>,
    ) -> Vec<JoinHandle<()>> {
        let formatter = Arc::clone(&self.formatter);
        spawn_stage(1, trap_rx, move |trap| {
            let formatter = Arc::clone(&formatter);
            let formatted_tx = formatted_tx.clone();
            async move {
                match formatter.format_trap(&trap) {
                    Ok(data) => {
                        let _ = formatted_tx.send(data).await;
                    }
                    Err(e) => {
                        warn!(
                            trap_oid = %trap.trap_info.trap_oid,
                            error = %e,
                            "trap format error"
                        );
                    }
                }
            }
        })
    }

    fn spawn_transport_stage(&self, formatted_rx: mpsc::Receiver<Vec<u8>>) -> Vec<JoinHandle<()>> {
        let transport = Arc::clone(&self.transport);
        spawn_stage(self.cfg.transport_workers, formatted_rx, move |data: Vec<u8>| {
            let transport = Arc::clone(&transport);
            async move {
                if let Err(e) = transport.send(&data) {
                    error!(bytes = data.len(), error = %e, "transport send error");
                }
            }
        })
    }

    fn spawn_counter_purge(&self, producer: &Arc<MetricProducer>) -> Option<JoinHandle<()>> {
        producer.counters()?;
        if self.cfg.counter_purge_age.is_zero() {
            return None;
        }
        let producer = Arc::clone(producer);
        let cancel = self.cancel.clone();
        let max_age = chrono::Duration::from_std(self.cfg.counter_purge_age).ok()?;
        let period = (self.cfg.counter_purge_age / 6).max(Duration::from_secs(1));
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }
                if let Some(counters) = producer.counters() {
                    let removed = counters.purge(max_age, chrono::Utc::now());
                    if removed > 0 {
                        info!(removed, "purged idle counter series");
                    }
                }
            }
        }))
    }
}

/// Spawns `workers` tasks that drain `rx` through `handler`. The stage
/// ends when the channel closes; whatever senders the handler captured
/// drop with it, cascading closure downstream.
fn spawn_stage<I, F, Fut>(workers: usize, rx: mpsc::Receiver<I>, handler: F) -> Vec<JoinHandle<()>>
where
    I: Send + 'static,
    F: Fn(I) -> Fut + Send + Sync + Clone + 'static,
    Fut: Future<Output = ()> + Send,
{
    let rx = Arc::new(tokio::sync::Mutex::new(rx));
    (0..workers.max(1))
        .map(|_| {
            let rx = Arc::clone(&rx);
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    let item = { rx.lock().await.recv().await };
                    let Some(item) = item else { return };
                    handler(item).await;
                }
            })
        })
        .collect()
}

