//! SNMP session abstraction.
//!
//! The poller talks to devices through the [`Session`] trait so that the
//! wire protocol stays behind one seam: production sessions wrap
//! [`async_snmp::Client`], tests inject scripted implementations with no
//! UDP or BER involved. [`Dialer`] is the matching injection point for
//! session construction, used by the connection pool.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_snmp::client::Retry;
use async_snmp::{Auth, AuthProtocol, Client, Oid, PrivProtocol, UsmBuilder, VarBind};

use crate::config::{DeviceConfig, V3Credentials};
use crate::error::{Error, Result};

/// Boxed future used by the object-safe session traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result type for raw session operations. Errors stay in the wire
/// library's type; the poller adds device and object context when wrapping
/// them into [`Error::Snmp`].
pub type SessionResult<T> = std::result::Result<T, Box<async_snmp::Error>>;

/// Maximum OIDs packed into a single Get PDU. Scalar polls above this are
/// split into batches by the underlying client.
pub const PDU_MAX_OIDS: usize = 60;

/// One live SNMP session against a device.
///
/// All operations return the complete varbind list for the request; the
/// per-request timeout and retry policy are fixed at dial time from the
/// device configuration.
pub trait Session: Send + Sync {
    /// Get for an explicit list of OIDs (scalar polling).
    fn get_many<'a>(&'a self, oids: &'a [Oid]) -> BoxFuture<'a, SessionResult<Vec<VarBind>>>;

    /// GetNext-based subtree walk (SNMPv1 tables).
    fn walk(&self, root: Oid) -> BoxFuture<'_, SessionResult<Vec<VarBind>>>;

    /// GetBulk-based subtree walk (v2c/v3 tables).
    fn bulk_walk(&self, root: Oid) -> BoxFuture<'_, SessionResult<Vec<VarBind>>>;
}

/// Creates new [`Session`]s from device configuration.
pub trait Dialer: Send + Sync {
    fn dial<'a>(&'a self, cfg: &'a DeviceConfig) -> BoxFuture<'a, Result<Box<dyn Session>>>;
}

// ============================================================================
// Production implementation over async_snmp
// ============================================================================

/// Production session backed by an `async_snmp` UDP client.
pub struct ClientSession {
    client: Client,
}

impl ClientSession {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

impl Session for ClientSession {
    fn get_many<'a>(&'a self, oids: &'a [Oid]) -> BoxFuture<'a, SessionResult<Vec<VarBind>>> {
        Box::pin(self.client.get_many(oids))
    }

    fn walk(&self, root: Oid) -> BoxFuture<'_, SessionResult<Vec<VarBind>>> {
        Box::pin(self.client.walk_getnext(root).collect())
    }

    fn bulk_walk(&self, root: Oid) -> BoxFuture<'_, SessionResult<Vec<VarBind>>> {
        Box::pin(self.client.bulk_walk_default(root).collect())
    }
}

/// Production dialer: builds a connected [`ClientSession`] from device
/// configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct ClientDialer;

impl Dialer for ClientDialer {
    fn dial<'a>(&'a self, cfg: &'a DeviceConfig) -> BoxFuture<'a, Result<Box<dyn Session>>> {
        Box::pin(async move {
            let auth = auth_for(cfg)?;
            let retry = if cfg.exponential_timeout {
                Retry::exponential(cfg.retries).build()
            } else {
                Retry::fixed(cfg.retries, Duration::ZERO)
            };

            let client = Client::builder(cfg.target(), auth)
                .timeout(Duration::from_millis(cfg.timeout_ms))
                .retry(retry)
                .max_oids_per_request(PDU_MAX_OIDS)
                .connect()
                .await
                .map_err(|source| Error::Dial {
                    target: cfg.target(),
                    source,
                })?;

            Ok(Box::new(ClientSession::new(client)) as Box<dyn Session>)
        })
    }
}

/// Maps the configured SNMP version and credentials onto the client's
/// authentication model.
fn auth_for(cfg: &DeviceConfig) -> Result<Auth> {
    let community = cfg
        .communities
        .first()
        .map(String::as_str)
        .unwrap_or("public");

    match cfg.version.as_str() {
        "1" => Ok(Auth::v1(community)),
        "2c" => Ok(Auth::v2c(community)),
        "3" => {
            let cred = cfg.v3_credentials.first().cloned().unwrap_or_default();
            Ok(usm_auth(&cred).into())
        }
        other => Err(Error::Config(format!(
            "device {}: unsupported SNMP version {other:?}",
            cfg.ip
        ))),
    }
}

fn usm_auth(cred: &V3Credentials) -> UsmBuilder {
    let mut usm = Auth::usm(cred.username.clone());
    if let Some(proto) = auth_protocol(&cred.authentication_protocol) {
        usm = usm.auth(proto, cred.authentication_passphrase.clone());
    }
    if let Some(proto) = priv_protocol(&cred.privacy_protocol) {
        usm = usm.privacy(proto, cred.privacy_passphrase.clone());
    }
    usm
}

pub(crate) fn auth_protocol(name: &str) -> Option<AuthProtocol> {
    match name.to_ascii_lowercase().as_str() {
        "md5" => Some(AuthProtocol::Md5),
        "sha" => Some(AuthProtocol::Sha1),
        "sha224" => Some(AuthProtocol::Sha224),
        "sha256" => Some(AuthProtocol::Sha256),
        "sha384" => Some(AuthProtocol::Sha384),
        "sha512" => Some(AuthProtocol::Sha512),
        _ => None,
    }
}

pub(crate) fn priv_protocol(name: &str) -> Option<PrivProtocol> {
    // The "c" suffixed names select an alternate key-localization scheme in
    // some stacks; the cipher itself is identical, so they map to the base
    // protocol here.
    match name.to_ascii_lowercase().as_str() {
        "des" => Some(PrivProtocol::Des),
        "aes" | "aes128" => Some(PrivProtocol::Aes128),
        "aes192" | "aes192c" => Some(PrivProtocol::Aes192),
        "aes256" | "aes256c" => Some(PrivProtocol::Aes256),
        _ => None,
    }
}
