//! SNMP polling stage.
//!
//! Converts device configuration into live sessions, manages a per-device
//! connection pool, and executes the Get / walk operations that produce
//! [`RawPollResult`] messages for the decoder stage.

mod pool;
mod session;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use async_snmp::Oid;
use chrono::Utc;
use tracing::debug;

pub use pool::{ConnectionPool, PoolOptions, PooledSession};
pub use session::{
    BoxFuture, ClientDialer, ClientSession, Dialer, PDU_MAX_OIDS, Session, SessionResult,
};
pub(crate) use session::{auth_protocol, priv_protocol};
pub use worker::{JobSubmitter, WorkerPool};

use crate::config::{DeviceConfig, ObjectDefinition};
use crate::decode::RawPollResult;
use crate::error::{Error, Result};
use crate::model::Device;

/// A single SNMP poll request to be executed.
#[derive(Debug, Clone)]
pub struct PollJob {
    /// Device identity; the key into the snapshot's devices map.
    pub hostname: String,
    /// Device fields forwarded into output records.
    pub device: Device,
    /// Resolved configuration for the device.
    pub device_config: DeviceConfig,
    /// The object to poll.
    pub object: Arc<ObjectDefinition>,
}

/// Executes one poll job against a device.
///
/// Operation selection:
/// - scalar object (no index) → Get of every attribute OID with ".0"
/// - table object on SNMPv1 → GetNext walk of the lowest common prefix
/// - table object on v2c/v3 → bulk walk of the lowest common prefix
pub struct SnmpPoller {
    pool: Arc<ConnectionPool>,
}

impl SnmpPoller {
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Runs the SNMP operation described by `job`.
    ///
    /// On SNMP failure the session is discarded as potentially broken and
    /// the error is returned together with timestamps already stamped on
    /// the (empty) result.
    pub async fn poll(&self, job: &PollJob) -> Result<RawPollResult> {
        // The pool get deadline covers the whole request budget of a peer
        // holding every slot: per-request timeout times retries.
        let deadline = Duration::from_millis(
            job.device_config.timeout_ms * (u64::from(job.device_config.retries) + 1),
        );
        let pooled = self
            .pool
            .get(&job.hostname, &job.device_config, deadline)
            .await?;

        let mut result = RawPollResult {
            device: job.device.clone(),
            object: Arc::clone(&job.object),
            varbinds: Vec::new(),
            poll_started_at: Utc::now(),
            collected_at: Utc::now(),
        };

        let outcome = if job.object.is_scalar() {
            let oids = scalar_oids(&job.object)?;
            pooled.session.get_many(&oids).await
        } else if job.device_config.version == "1" {
            pooled.session.walk(walk_root(&job.object)?).await
        } else {
            pooled.session.bulk_walk(walk_root(&job.object)?).await
        };
        result.collected_at = Utc::now();

        match outcome {
            Ok(varbinds) => {
                result.varbinds = varbinds;
                self.pool.put(&job.hostname, pooled);
                debug!(
                    device = %job.hostname,
                    object = %job.object.key,
                    pdu_count = result.varbinds.len(),
                    duration_ms = (result.collected_at - result.poll_started_at).num_milliseconds(),
                    "poll completed"
                );
                Ok(result)
            }
            Err(source) => {
                self.pool.discard(&job.hostname, pooled);
                Err(Error::Snmp {
                    hostname: job.hostname.clone(),
                    object: job.object.key.clone(),
                    source,
                })
            }
        }
    }
}

/// Every attribute OID with the scalar ".0" instance appended (unless the
/// configuration already carries it).
fn scalar_oids(object: &ObjectDefinition) -> Result<Vec<Oid>> {
    if object.attributes.is_empty() {
        return Err(Error::NoAttributes {
            object: object.key.clone(),
        });
    }
    let mut oids = Vec::with_capacity(object.attributes.len());
    for attr in object.attributes.values() {
        let oid = parse_attr_oid(object, &attr.oid)?;
        if oid.arcs().last() == Some(&0) {
            oids.push(oid);
        } else {
            oids.push(oid.child(0));
        }
    }
    Ok(oids)
}

fn walk_root(object: &ObjectDefinition) -> Result<Oid> {
    lowest_common_oid(object).ok_or_else(|| Error::NoAttributes {
        object: object.key.clone(),
    })
}

/// The shortest OID that is a parent of every attribute OID in the object
/// definition: the walk root for table polls.
///
/// For `.1.3.6.1.2.1.2.2.1.10` and `.1.3.6.1.2.1.2.2.1.16` this is
/// `.1.3.6.1.2.1.2.2.1`. A single attribute is its own root; an object
/// with no attribute OIDs has none.
pub fn lowest_common_oid(object: &ObjectDefinition) -> Option<Oid> {
    let mut oids = object
        .attributes
        .values()
        .filter(|a| !a.oid.is_empty())
        .filter_map(|a| Oid::parse(&a.oid).ok());

    let first = oids.next()?;
    let mut prefix: Vec<u32> = first.arcs().to_vec();
    for oid in oids {
        let arcs = oid.arcs();
        let common = prefix
            .iter()
            .zip(arcs)
            .take_while(|(a, b)| a == b)
            .count();
        prefix.truncate(common);
    }
    Some(Oid::new(prefix))
}

fn parse_attr_oid(object: &ObjectDefinition, oid: &str) -> Result<Oid> {
    let parsed = Oid::parse(oid)
        .map_err(|_| Error::Config(format!("object {:?}: invalid OID {oid:?}", object.key)))?;
    if parsed.is_empty() {
        return Err(Error::Config(format!(
            "object {:?}: empty attribute OID",
            object.key
        )));
    }
    Ok(parsed)
}
