//! UDP trap listener.
//!
//! A completely separate input path from the poller: the poller requests
//! data on a schedule, the receiver passively listens for notifications
//! pushed by devices. Both paths converge on the shared formatted channel
//! downstream.
//!
//! The receiver is built on [`async_snmp::NotificationReceiver`], which
//! owns the socket, v3 USM processing, and inform acknowledgement.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_snmp::notification::{Notification, NotificationReceiver};
use async_snmp::{Oid, Value, VarBind, oid};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::V3Credentials;
use crate::error::{Error, Result};
use crate::model::Trap;
use crate::poll::{auth_protocol, priv_protocol};
use crate::trap::TrapPdu;

/// Converts a received PDU into a [`Trap`]. Injectable so unit tests can
/// bypass real UDP and ASN.1.
pub type ParseFn = Arc<dyn Fn(&TrapPdu, Option<SocketAddr>) -> Result<Trap> + Send + Sync>;

/// Trap receiver behaviour.
#[derive(Clone)]
pub struct TrapReceiverConfig {
    /// UDP address to bind (default "0.0.0.0:162").
    pub listen_addr: String,
    /// Capacity of the output channel (default 10 000).
    pub buffer: usize,
    /// How long `stop` waits for the receive task before proceeding
    /// anyway (default 3 s).
    pub close_timeout: Duration,
    /// USM users accepted for v3 notifications.
    pub usm_users: Vec<V3Credentials>,
    /// Replaces the default parse function. Used in tests.
    pub parse: Option<ParseFn>,
}

impl Default for TrapReceiverConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:162".to_string(),
            buffer: 10_000,
            close_timeout: Duration::from_secs(3),
            usm_users: Vec::new(),
            parse: None,
        }
    }
}

impl std::fmt::Debug for TrapReceiverConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrapReceiverConfig")
            .field("listen_addr", &self.listen_addr)
            .field("buffer", &self.buffer)
            .field("close_timeout", &self.close_timeout)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct State {
    running: bool,
    stopped: bool,
    task: Option<JoinHandle<()>>,
}

/// Listens for SNMP traps and informs and emits parsed [`Trap`]s on a
/// bounded output channel.
pub struct TrapReceiver {
    cfg: TrapReceiverConfig,
    output_tx: Mutex<Option<mpsc::Sender<Trap>>>,
    output_rx: Mutex<Option<mpsc::Receiver<Trap>>>,
    stop: CancellationToken,
    state: Mutex<State>,
}

impl TrapReceiver {
    pub fn new(cfg: TrapReceiverConfig) -> Self {
        let buffer = if cfg.buffer == 0 { 10_000 } else { cfg.buffer };
        let (tx, rx) = mpsc::channel(buffer);
        Self {
            cfg,
            output_tx: Mutex::new(Some(tx)),
            output_rx: Mutex::new(Some(rx)),
            stop: CancellationToken::new(),
            state: Mutex::new(State::default()),
        }
    }

    /// The output channel. Closed exactly once, when the receiver stops.
    /// Can be taken once.
    pub fn take_output(&self) -> Option<mpsc::Receiver<Trap>> {
        self.output_rx.lock().unwrap().take()
    }

    /// Binds the socket and returns once the receiver is listening.
    ///
    /// Received notifications are parsed and emitted asynchronously; a
    /// full output channel drops the trap with a warning rather than
    /// blocking the socket handler. Cancelling `cancel` stops the
    /// receiver. Starting twice is an error.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        {
            // Claim the running slot before the bind so concurrent starts
            // cannot both pass the guard.
            let mut state = self.state.lock().unwrap();
            if state.running {
                return Err(Error::AlreadyRunning {
                    component: "trap receiver",
                });
            }
            if state.stopped {
                return Err(Error::Stopped {
                    component: "trap receiver",
                });
            }
            state.running = true;
        }

        let receiver = match self.bind().await {
            Ok(receiver) => receiver,
            Err(e) => {
                self.state.lock().unwrap().running = false;
                return Err(e);
            }
        };
        info!(addr = %self.cfg.listen_addr, "trap receiver listening");

        let tx = self
            .output_tx
            .lock()
            .unwrap()
            .clone()
            .ok_or(Error::Stopped {
                component: "trap receiver",
            })?;
        let parse = self.cfg.parse.clone().unwrap_or_else(|| {
            let default: ParseFn = Arc::new(|pdu, source| Ok(crate::trap::parse(pdu, source)));
            default
        });

        let stop = self.stop.clone();
        let cancel = cancel.clone();
        let task = tokio::spawn(receive_loop(receiver, tx, parse, stop, cancel));

        self.state.lock().unwrap().task = Some(task);
        Ok(())
    }

    /// Stops the receiver: closes the socket, waits for the receive loop
    /// up to the configured grace period, then closes the output channel.
    /// Idempotent.
    pub async fn stop(&self) {
        self.stop.cancel();

        let task = {
            let mut state = self.state.lock().unwrap();
            state.running = false;
            state.stopped = true;
            state.task.take()
        };

        if let Some(task) = task {
            if tokio::time::timeout(self.cfg.close_timeout, task)
                .await
                .is_err()
            {
                warn!(
                    addr = %self.cfg.listen_addr,
                    "trap receiver did not shut down within the grace period"
                );
            }
        }

        // The task's sender clone is gone (or abandoned); dropping ours
        // closes the channel for consumers.
        self.output_tx.lock().unwrap().take();
        info!(addr = %self.cfg.listen_addr, "trap receiver stopped");
    }

    async fn bind(&self) -> Result<NotificationReceiver> {
        let map_err = |source| Error::TrapListener {
            addr: self.cfg.listen_addr.clone(),
            source,
        };

        if self.cfg.usm_users.is_empty() {
            return NotificationReceiver::bind(&self.cfg.listen_addr)
                .await
                .map_err(map_err);
        }

        let mut builder = NotificationReceiver::builder().bind(self.cfg.listen_addr.clone());
        for cred in &self.cfg.usm_users {
            let auth = auth_protocol(&cred.authentication_protocol);
            let privacy = priv_protocol(&cred.privacy_protocol);
            let auth_pass = cred.authentication_passphrase.clone().into_bytes();
            let priv_pass = cred.privacy_passphrase.clone().into_bytes();
            builder = builder.usm_user(cred.username.clone().into_bytes(), move |mut user| {
                if let Some(proto) = auth {
                    user = user.auth(proto, auth_pass.clone());
                }
                if let Some(proto) = privacy {
                    user = user.privacy(proto, priv_pass.clone());
                }
                user
            });
        }
        builder.build().await.map_err(map_err)
    }
}

async fn receive_loop(
    receiver: NotificationReceiver,
    tx: mpsc::Sender<Trap>,
    parse: ParseFn,
    stop: CancellationToken,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = stop.cancelled() => return,
            _ = cancel.cancelled() => return,
            received = receiver.recv() => received,
        };

        let (notification, source) = match received {
            Ok(ok) => ok,
            Err(e) => {
                warn!(error = %e, "trap receive error");
                continue;
            }
        };

        let pdu = pdu_from_notification(notification);
        let trap = match parse(&pdu, Some(source)) {
            Ok(trap) => trap,
            Err(e) => {
                warn!(remote = %source, error = %e, "trap parse error");
                continue;
            }
        };

        // The socket handler must never block on downstream congestion.
        if let Err(mpsc::error::TrySendError::Full(trap)) = tx.try_send(trap) {
            warn!(
                remote = %source,
                trap_oid = %trap.trap_info.trap_oid,
                "trap output buffer full, dropping trap"
            );
        }
    }
}

/// Re-shapes a library notification into the version-tagged PDU the parser
/// consumes. The v2c/v3 header varbinds the library already split off are
/// put back in wire order so the parser sees the list as it was sent.
fn pdu_from_notification(notification: Notification) -> TrapPdu {
    fn with_header(uptime: u32, trap_oid: Oid, varbinds: Vec<VarBind>) -> Vec<VarBind> {
        let mut all = Vec::with_capacity(varbinds.len() + 2);
        all.push(VarBind::new(
            oid!(1, 3, 6, 1, 2, 1, 1, 3, 0),
            Value::TimeTicks(uptime),
        ));
        all.push(VarBind::new(
            oid!(1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0),
            Value::ObjectIdentifier(trap_oid),
        ));
        all.extend(varbinds);
        all
    }

    match notification {
        Notification::TrapV1 { trap, .. } => TrapPdu::V1(trap),
        Notification::TrapV2c {
            uptime,
            trap_oid,
            varbinds,
            ..
        }
        | Notification::InformV2c {
            uptime,
            trap_oid,
            varbinds,
            ..
        } => TrapPdu::V2c {
            varbinds: with_header(uptime, trap_oid, varbinds),
        },
        Notification::TrapV3 {
            uptime,
            trap_oid,
            varbinds,
            ..
        }
        | Notification::InformV3 {
            uptime,
            trap_oid,
            varbinds,
            ..
        } => TrapPdu::V3 {
            varbinds: with_header(uptime, trap_oid, varbinds),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_snmp::pdu::{GenericTrap, TrapV1Pdu};
    use bytes::Bytes;

    fn config(addr: &str) -> TrapReceiverConfig {
        TrapReceiverConfig {
            listen_addr: addr.to_string(),
            buffer: 8,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_stop_closes_output() {
        let receiver = TrapReceiver::new(config("127.0.0.1:0"));
        let mut output = receiver.take_output().unwrap();
        let cancel = CancellationToken::new();

        receiver.start(&cancel).await.unwrap();
        receiver.stop().await;
        // Idempotent.
        receiver.stop().await;

        assert!(output.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_double_start_errors() {
        let receiver = TrapReceiver::new(config("127.0.0.1:0"));
        let cancel = CancellationToken::new();
        receiver.start(&cancel).await.unwrap();
        assert!(matches!(
            receiver.start(&cancel).await,
            Err(Error::AlreadyRunning { .. })
        ));
        receiver.stop().await;
    }

    #[tokio::test]
    async fn test_start_after_stop_errors() {
        let receiver = TrapReceiver::new(config("127.0.0.1:0"));
        let cancel = CancellationToken::new();
        receiver.start(&cancel).await.unwrap();
        receiver.stop().await;
        assert!(matches!(
            receiver.start(&cancel).await,
            Err(Error::Stopped { .. })
        ));
    }

    #[tokio::test]
    async fn test_bind_error_surfaces() {
        let receiver = TrapReceiver::new(config("256.0.0.1:99999"));
        let cancel = CancellationToken::new();
        assert!(matches!(
            receiver.start(&cancel).await,
            Err(Error::TrapListener { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancellation_stops_receiver() {
        let receiver = TrapReceiver::new(config("127.0.0.1:0"));
        let mut output = receiver.take_output().unwrap();
        let cancel = CancellationToken::new();
        receiver.start(&cancel).await.unwrap();

        cancel.cancel();
        receiver.stop().await;
        assert!(output.recv().await.is_none());
    }

    #[test]
    fn test_pdu_from_notification_restores_header() {
        let notification = Notification::TrapV2c {
            community: Bytes::from_static(b"public"),
            uptime: 42,
            trap_oid: async_snmp::oid!(1, 3, 6, 1, 6, 3, 1, 1, 5, 3),
            varbinds: vec![VarBind::new(
                async_snmp::oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 1, 3),
                Value::Integer(3),
            )],
            request_id: 7,
        };
        let TrapPdu::V2c { varbinds } = pdu_from_notification(notification) else {
            panic!("expected v2c pdu");
        };
        assert_eq!(varbinds.len(), 3);
        assert_eq!(varbinds[0].value, Value::TimeTicks(42));
        assert!(matches!(varbinds[1].value, Value::ObjectIdentifier(_)));
    }

    #[test]
    fn test_pdu_from_notification_v1_passthrough() {
        let trap = TrapV1Pdu::new(
            async_snmp::oid!(1, 3, 6, 1, 4, 1, 9),
            [10, 0, 0, 1],
            GenericTrap::LinkDown,
            0,
            12345,
            vec![],
        );
        let notification = Notification::TrapV1 {
            community: Bytes::from_static(b"public"),
            trap,
        };
        assert!(matches!(
            pdu_from_notification(notification),
            TrapPdu::V1(_)
        ));
    }
}
