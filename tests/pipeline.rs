//! End-to-end pipeline tests with scripted SNMP sessions.
//!
//! Every stage runs for real (scheduler, worker pool, decoder, producer,
//! formatter, transport); only the wire protocol is replaced by a dialer
//! returning scripted varbinds.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_snmp::{Oid, Value, VarBind, oid};
use bytes::Bytes;

use snmp_collector::config::{
    AttributeDefinition, DeviceConfig, DeviceGroup, ObjectDefinition, ObjectGroup, Rediscover,
    Snapshot,
};
use snmp_collector::format::JsonFormatter;
use snmp_collector::pipeline::{Pipeline, PipelineConfig};
use snmp_collector::poll::{BoxFuture, Dialer, PoolOptions, Session, SessionResult};
use snmp_collector::produce::EnumRegistry;
use snmp_collector::transport::Transport;

// ============================================================================
// Scripted session / dialer
// ============================================================================

struct ScriptedSession {
    varbinds: Vec<VarBind>,
}

impl Session for ScriptedSession {
    fn get_many<'a>(&'a self, _oids: &'a [Oid]) -> BoxFuture<'a, SessionResult<Vec<VarBind>>> {
        Box::pin(async move { Ok(self.varbinds.clone()) })
    }
    fn walk(&self, _root: Oid) -> BoxFuture<'_, SessionResult<Vec<VarBind>>> {
        Box::pin(async move { Ok(self.varbinds.clone()) })
    }
    fn bulk_walk(&self, _root: Oid) -> BoxFuture<'_, SessionResult<Vec<VarBind>>> {
        Box::pin(async move { Ok(self.varbinds.clone()) })
    }
}

struct ScriptedDialer {
    varbinds: Vec<VarBind>,
}

impl Dialer for ScriptedDialer {
    fn dial<'a>(
        &'a self,
        _cfg: &'a DeviceConfig,
    ) -> BoxFuture<'a, snmp_collector::Result<Box<dyn Session>>> {
        let varbinds = self.varbinds.clone();
        Box::pin(async move { Ok(Box::new(ScriptedSession { varbinds }) as Box<dyn Session>) })
    }
}

// ============================================================================
// Capturing transport
// ============================================================================

#[derive(Clone, Default)]
struct CapturingTransport {
    records: Arc<Mutex<Vec<serde_json::Value>>>,
    closed: Arc<Mutex<bool>>,
}

impl CapturingTransport {
    fn records(&self) -> Vec<serde_json::Value> {
        self.records.lock().unwrap().clone()
    }
}

impl Transport for CapturingTransport {
    fn send(&self, data: &[u8]) -> snmp_collector::Result<()> {
        let json = serde_json::from_slice(data).expect("transport always receives valid JSON");
        self.records.lock().unwrap().push(json);
        Ok(())
    }
    fn close(&self) -> snmp_collector::Result<()> {
        *self.closed.lock().unwrap() = true;
        Ok(())
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn attr(oid: &str, name: &str, syntax: &str, is_tag: bool) -> AttributeDefinition {
    AttributeDefinition {
        oid: oid.to_string(),
        name: name.to_string(),
        syntax: syntax.to_string(),
        is_tag,
        overrides: None,
        rediscover: Rediscover::None,
    }
}

fn if_entry() -> Arc<ObjectDefinition> {
    Arc::new(ObjectDefinition {
        key: "IF-MIB::ifEntry".into(),
        mib: "IF-MIB".into(),
        object: "ifEntry".into(),
        index: vec![snmp_collector::config::IndexDefinition {
            kind: "Integer".into(),
            oid: "1.3.6.1.2.1.2.2.1.1".into(),
            name: "netif".into(),
            syntax: String::new(),
        }],
        attributes: HashMap::from([
            (
                "ifDescr".into(),
                attr("1.3.6.1.2.1.2.2.1.2", "netif.descr", "DisplayString", true),
            ),
            (
                "ifType".into(),
                attr("1.3.6.1.2.1.2.2.1.3", "netif.type", "Integer", true),
            ),
            (
                "ifOperStatus".into(),
                attr("1.3.6.1.2.1.2.2.1.8", "netif.state.oper", "EnumInteger", false),
            ),
            (
                "ifInOctets".into(),
                attr("1.3.6.1.2.1.2.2.1.10", "netif.bytes.in", "Counter32", false),
            ),
            (
                "ifOutOctets".into(),
                attr("1.3.6.1.2.1.2.2.1.16", "netif.bytes.out", "Counter32", false),
            ),
        ]),
        ..Default::default()
    })
}

fn snapshot() -> Snapshot {
    let enums = EnumRegistry::new();
    enums.register_int_enum(
        "1.3.6.1.2.1.2.2.1.8",
        false,
        HashMap::from([(1, "up".to_string()), (2, "down".to_string())]),
    );

    Snapshot {
        devices: HashMap::from([(
            "core-sw-01".to_string(),
            DeviceConfig {
                ip: "10.0.0.1".into(),
                port: 161,
                poll_interval: 60,
                timeout_ms: 1000,
                retries: 0,
                exponential_timeout: false,
                version: "2c".into(),
                communities: vec!["public".into()],
                v3_credentials: vec![],
                device_groups: vec!["switches".into()],
                max_concurrent_polls: 4,
                vendor: "cisco".into(),
                model: String::new(),
                tags: HashMap::from([("site".to_string(), "fra1".to_string())]),
            },
        )]),
        device_groups: HashMap::from([(
            "switches".to_string(),
            DeviceGroup {
                object_groups: vec!["interfaces".into()],
            },
        )]),
        object_groups: HashMap::from([(
            "interfaces".to_string(),
            ObjectGroup {
                objects: vec!["IF-MIB::ifEntry".into()],
            },
        )]),
        objects: HashMap::from([("IF-MIB::ifEntry".to_string(), if_entry())]),
        enums: Arc::new(enums),
    }
}

/// The varbinds a bulk walk of ifEntry would return for two interfaces.
fn two_interface_varbinds() -> Vec<VarBind> {
    vec![
        VarBind::new(
            oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 1),
            Value::OctetString(Bytes::from_static(b"Gi0/0/1")),
        ),
        VarBind::new(
            oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 2),
            Value::OctetString(Bytes::from_static(b"Gi0/0/2")),
        ),
        VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 3, 1), Value::Integer(6)),
        VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 3, 2), Value::Integer(6)),
        VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 8, 1), Value::Integer(1)),
        VarBind::new(oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 8, 2), Value::Integer(2)),
        VarBind::new(
            oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 10, 1),
            Value::Counter32(1_234_567_890),
        ),
        VarBind::new(
            oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 10, 2),
            Value::Counter32(1_678_901_234),
        ),
        VarBind::new(
            oid!(1, 3, 6, 1, 2, 1, 2, 2, 1, 16, 1),
            Value::Counter32(987_654_321),
        ),
    ]
}

fn pipeline_config(varbinds: Vec<VarBind>) -> PipelineConfig {
    PipelineConfig {
        collector_id: "test-collector".into(),
        poller_workers: 4,
        decoder_workers: 2,
        producer_workers: 2,
        formatter_workers: 2,
        transport_workers: 1,
        buffer_size: 64,
        pool: PoolOptions {
            dialer: Arc::new(ScriptedDialer { varbinds }),
            ..Default::default()
        },
        enum_enabled: true,
        counter_delta_enabled: false,
        ..Default::default()
    }
}

async fn wait_for_records(transport: &CapturingTransport, count: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if transport.records().len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("pipeline did not produce records in time");
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_poll_path_end_to_end() {
    let transport = CapturingTransport::default();
    let mut pipeline = Pipeline::new(
        pipeline_config(two_interface_varbinds()),
        Arc::new(JsonFormatter::default()),
        Arc::new(transport.clone()),
    );
    pipeline.start(snapshot()).await.unwrap();
    assert_eq!(pipeline.schedule_entries(), 1);

    wait_for_records(&transport, 1).await;
    pipeline.stop().await;

    let records = transport.records();
    let record = &records[0];

    assert_eq!(record["device"]["hostname"], "core-sw-01");
    assert_eq!(record["device"]["ip_address"], "10.0.0.1");
    assert_eq!(record["device"]["vendor"], "cisco");
    assert_eq!(record["device"]["tags"]["site"], "fra1");
    assert_eq!(record["metadata"]["collector_id"], "test-collector");
    assert_eq!(record["metadata"]["poll_status"], "success");

    let metrics = record["metrics"].as_array().unwrap();
    // Three measurements for interface 1, two for interface 2; tags are
    // dimensions, not metrics.
    assert_eq!(metrics.len(), 5);

    let find = |name: &str, instance: &str| {
        metrics
            .iter()
            .find(|m| m["name"] == name && m["instance"] == instance)
            .unwrap_or_else(|| panic!("missing metric {name}/{instance}"))
    };

    assert_eq!(find("netif.state.oper", "1")["value"], "up");
    assert_eq!(find("netif.state.oper", "2")["value"], "down");
    assert_eq!(find("netif.bytes.in", "1")["value"], 1_234_567_890u64);
    assert_eq!(find("netif.bytes.out", "1")["value"], 987_654_321u64);

    for m in metrics {
        let want = if m["instance"] == "1" { "Gi0/0/1" } else { "Gi0/0/2" };
        assert_eq!(m["tags"]["netif.descr"], want);
        assert_eq!(m["tags"]["netif.type"], "6");
    }
}

#[tokio::test]
async fn test_counter_delta_across_polls() {
    let mut cfg = pipeline_config(two_interface_varbinds());
    cfg.counter_delta_enabled = true;

    let transport = CapturingTransport::default();
    let mut pipeline = Pipeline::new(
        cfg,
        Arc::new(JsonFormatter::default()),
        Arc::new(transport.clone()),
    );
    pipeline.start(snapshot()).await.unwrap();

    wait_for_records(&transport, 1).await;
    pipeline.stop().await;

    // First observation of every counter series establishes it at zero.
    let records = transport.records();
    let metrics = records[0]["metrics"].as_array().unwrap();
    for m in metrics {
        if m["syntax"] == "Counter32" {
            assert_eq!(m["value"], 0, "first counter sample must be zero: {m}");
        }
    }
}

#[tokio::test]
async fn test_reload_removes_device() {
    let transport = CapturingTransport::default();
    let mut pipeline = Pipeline::new(
        pipeline_config(two_interface_varbinds()),
        Arc::new(JsonFormatter::default()),
        Arc::new(transport.clone()),
    );
    pipeline.start(snapshot()).await.unwrap();
    wait_for_records(&transport, 1).await;

    let mut snap = snapshot();
    snap.devices.clear();
    pipeline.reload(&snap);
    assert_eq!(pipeline.schedule_entries(), 0);

    pipeline.stop().await;
}

#[tokio::test]
async fn test_stop_flushes_and_closes_transport() {
    let transport = CapturingTransport::default();
    let mut pipeline = Pipeline::new(
        pipeline_config(two_interface_varbinds()),
        Arc::new(JsonFormatter::default()),
        Arc::new(transport.clone()),
    );
    pipeline.start(snapshot()).await.unwrap();
    wait_for_records(&transport, 1).await;
    pipeline.stop().await;

    assert!(*transport.closed.lock().unwrap());

    // Stopping twice is harmless.
    pipeline.stop().await;
}

#[tokio::test]
async fn test_double_start_rejected() {
    let transport = CapturingTransport::default();
    let mut pipeline = Pipeline::new(
        pipeline_config(vec![]),
        Arc::new(JsonFormatter::default()),
        Arc::new(transport),
    );
    pipeline.start(snapshot()).await.unwrap();
    assert!(pipeline.start(snapshot()).await.is_err());
    pipeline.stop().await;
}
