//! Per-device SNMP connection pool.
//!
//! Sessions are expensive to dial (v3 engine discovery in particular), so
//! idle ones are kept for reuse. Each device also gets a concurrency
//! semaphore sized to its `max_concurrent_polls`, bounding in-flight
//! requests no matter how many poll workers are running.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::DeviceConfig;
use crate::error::{Error, Result};
use crate::poll::session::{ClientDialer, Dialer, Session};

/// Connection pool behaviour.
#[derive(Clone)]
pub struct PoolOptions {
    /// Maximum idle sessions kept per device (default 2). Excess sessions
    /// returned via `put` are dropped immediately.
    pub max_idle_per_device: usize,
    /// How long an idle session may sit in the pool before being replaced
    /// by a fresh dial. `None` means no expiry.
    pub idle_timeout: Option<Duration>,
    /// Session factory. Defaults to [`ClientDialer`].
    pub dialer: Arc<dyn Dialer>,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_idle_per_device: 2,
            idle_timeout: None,
            dialer: Arc::new(ClientDialer),
        }
    }
}

impl std::fmt::Debug for PoolOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolOptions")
            .field("max_idle_per_device", &self.max_idle_per_device)
            .field("idle_timeout", &self.idle_timeout)
            .finish_non_exhaustive()
    }
}

struct IdleEntry {
    session: Box<dyn Session>,
    returned_at: Instant,
}

/// Per-device idle stack plus concurrency semaphore.
struct DevicePool {
    /// LIFO stack so the most recently used session is reused first and
    /// older ones age out via the idle timeout.
    idle: Mutex<Vec<IdleEntry>>,
    /// Capacity equals the device's `max_concurrent_polls`.
    semaphore: Arc<Semaphore>,
}

/// A checked-out session together with its concurrency permit. Dropping
/// the value releases the device slot; the session itself is returned or
/// discarded through the pool.
pub struct PooledSession {
    pub session: Box<dyn Session>,
    _permit: OwnedSemaphorePermit,
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession").finish_non_exhaustive()
    }
}

impl PooledSession {
    fn split(self) -> (Box<dyn Session>, OwnedSemaphorePermit) {
        (self.session, self._permit)
    }
}

/// Manages sessions keyed by device hostname, enforcing per-device
/// concurrency limits and recycling idle sessions.
pub struct ConnectionPool {
    opts: PoolOptions,
    pools: Mutex<HashMap<String, Arc<DevicePool>>>,
    closed: CancellationToken,
}

impl ConnectionPool {
    pub fn new(opts: PoolOptions) -> Self {
        Self {
            opts,
            pools: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
        }
    }

    /// Acquires a session for `hostname`, blocking on the per-device
    /// semaphore up to `deadline`. Fails once the pool is closed.
    ///
    /// Dialing a replacement for a stale or missing session happens under
    /// the acquired permit; a dial failure releases the slot.
    pub async fn get(
        &self,
        hostname: &str,
        cfg: &DeviceConfig,
        deadline: Duration,
    ) -> Result<PooledSession> {
        if self.closed.is_cancelled() {
            return Err(Error::PoolClosed);
        }

        let pool = self.device_pool(hostname, cfg.max_concurrent_polls);

        let permit = tokio::select! {
            _ = self.closed.cancelled() => return Err(Error::PoolClosed),
            acquired = tokio::time::timeout(deadline, pool.semaphore.clone().acquire_owned()) => {
                match acquired {
                    Ok(Ok(permit)) => permit,
                    Ok(Err(_)) => return Err(Error::PoolClosed),
                    Err(_) => {
                        return Err(Error::PoolTimeout {
                            hostname: hostname.to_string(),
                        });
                    }
                }
            }
        };

        if let Some(session) = self.pop_idle(&pool) {
            return Ok(PooledSession {
                session,
                _permit: permit,
            });
        }

        match self.opts.dialer.dial(cfg).await {
            Ok(session) => Ok(PooledSession {
                session,
                _permit: permit,
            }),
            Err(e) => {
                // The permit drops here, releasing the slot.
                Err(e)
            }
        }
    }

    /// Returns a session for reuse. Sessions beyond `max_idle_per_device`,
    /// or arriving after `close`, are dropped. The concurrency slot is
    /// released either way.
    pub fn put(&self, hostname: &str, pooled: PooledSession) {
        let (session, _permit) = pooled.split();

        if self.closed.is_cancelled() {
            return;
        }
        let Some(pool) = self.lookup(hostname) else {
            return;
        };

        let mut idle = pool.idle.lock().unwrap();
        if idle.len() >= self.opts.max_idle_per_device {
            return;
        }
        idle.push(IdleEntry {
            session,
            returned_at: Instant::now(),
        });
    }

    /// Drops a known-broken session without re-idling it. The concurrency
    /// slot is released.
    pub fn discard(&self, hostname: &str, pooled: PooledSession) {
        debug!(hostname, "discarding session");
        drop(pooled);
    }

    /// Drains all idle sessions and rejects subsequent `get` calls.
    /// Idempotent.
    pub fn close(&self) {
        self.closed.cancel();
        let pools = self.pools.lock().unwrap();
        for pool in pools.values() {
            pool.idle.lock().unwrap().clear();
        }
    }

    fn device_pool(&self, hostname: &str, max_concurrent: usize) -> Arc<DevicePool> {
        let mut pools = self.pools.lock().unwrap();
        pools
            .entry(hostname.to_string())
            .or_insert_with(|| {
                let capacity = if max_concurrent == 0 { 4 } else { max_concurrent };
                Arc::new(DevicePool {
                    idle: Mutex::new(Vec::new()),
                    semaphore: Arc::new(Semaphore::new(capacity)),
                })
            })
            .clone()
    }

    fn lookup(&self, hostname: &str) -> Option<Arc<DevicePool>> {
        self.pools.lock().unwrap().get(hostname).cloned()
    }

    /// Pops the freshest idle session, dropping any that outlived the idle
    /// timeout on the way.
    fn pop_idle(&self, pool: &DevicePool) -> Option<Box<dyn Session>> {
        let mut idle = pool.idle.lock().unwrap();
        while let Some(entry) = idle.pop() {
            if let Some(timeout) = self.opts.idle_timeout {
                if entry.returned_at.elapsed() > timeout {
                    continue;
                }
            }
            return Some(entry.session);
        }
        None
    }
}
