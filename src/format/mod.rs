//! Output record serialization.
//!
//! The canonical output format is JSON; the [`Formatter`] trait is the
//! seam where alternative serializations (protobuf, line protocol, ...)
//! would plug in without touching the pipeline.

use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::model::{MetricBatch, Trap};

/// Serializes pipeline records into transport-ready bytes.
pub trait Formatter: Send + Sync {
    fn format_batch(&self, batch: &MetricBatch) -> Result<Vec<u8>>;
    fn format_trap(&self, trap: &Trap) -> Result<Vec<u8>>;
}

/// JSON formatter. All schema decisions live as serde attributes on the
/// model types, so serialization is a single call here. Immutable after
/// construction and safe for concurrent use.
#[derive(Debug, Clone, Default)]
pub struct JsonFormatter {
    /// Emit indented, human-readable JSON. Off in production to keep the
    /// byte count down.
    pub pretty: bool,
}

impl JsonFormatter {
    pub fn new(pretty: bool) -> Self {
        Self { pretty }
    }

    fn serialize<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        let data = if self.pretty {
            serde_json::to_vec_pretty(value)?
        } else {
            serde_json::to_vec(value)?
        };
        Ok(data)
    }
}

impl Formatter for JsonFormatter {
    fn format_batch(&self, batch: &MetricBatch) -> Result<Vec<u8>> {
        let data = self.serialize(batch)?;
        debug!(
            hostname = %batch.device.hostname,
            metric_count = batch.metrics.len(),
            bytes = data.len(),
            "formatted metric batch"
        );
        Ok(data)
    }

    fn format_trap(&self, trap: &Trap) -> Result<Vec<u8>> {
        let data = self.serialize(trap)?;
        debug!(
            trap_oid = %trap.trap_info.trap_oid,
            varbind_count = trap.varbinds.len(),
            bytes = data.len(),
            "formatted trap"
        );
        Ok(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Device, Metric, MetricMetadata, MetricValue, TrapInfo};
    use chrono::{TimeZone, Utc};
    use std::collections::HashMap;

    fn batch() -> MetricBatch {
        MetricBatch {
            timestamp: Utc.with_ymd_and_hms(2026, 2, 26, 10, 30, 0).unwrap(),
            device: Device {
                hostname: "core-sw-01".into(),
                ip_address: "10.0.0.1".into(),
                snmp_version: "2c".into(),
                ..Default::default()
            },
            metrics: vec![Metric {
                oid: "1.3.6.1.2.1.2.2.1.10.1".into(),
                name: "netif.bytes.in".into(),
                instance: "1".into(),
                value: MetricValue::Uint(1234),
                snmp_type: "Counter32".into(),
                syntax: "Counter32".into(),
                tags: HashMap::from([("netif.descr".to_string(), "Gi0/0/1".to_string())]),
            }],
            metadata: MetricMetadata {
                collector_id: "collector-1".into(),
                poll_duration_ms: 42,
                poll_status: "success".into(),
            },
        }
    }

    #[test]
    fn test_batch_schema() {
        let data = JsonFormatter::new(false).format_batch(&batch()).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&data).unwrap();

        assert_eq!(json["device"]["hostname"], "core-sw-01");
        assert_eq!(json["device"]["snmp_version"], "2c");
        assert_eq!(json["metrics"][0]["oid"], "1.3.6.1.2.1.2.2.1.10.1");
        assert_eq!(json["metrics"][0]["value"], 1234);
        assert_eq!(json["metrics"][0]["type"], "Counter32");
        assert_eq!(json["metrics"][0]["tags"]["netif.descr"], "Gi0/0/1");
        assert_eq!(json["metadata"]["collector_id"], "collector-1");
        assert_eq!(json["metadata"]["poll_status"], "success");

        // The timestamp round-trips as RFC 3339 UTC.
        let ts = json["timestamp"].as_str().unwrap();
        chrono::DateTime::parse_from_rfc3339(ts).unwrap();

        // Empty device optionals are absent entirely.
        assert!(json["device"].get("vendor").is_none());
    }

    #[test]
    fn test_trap_schema() {
        let trap = Trap {
            timestamp: Utc::now(),
            device: Device {
                ip_address: "10.0.0.1".into(),
                snmp_version: "1".into(),
                ..Default::default()
            },
            trap_info: TrapInfo {
                version: "v1".into(),
                enterprise_oid: ".1.3.6.1.4.1.9".into(),
                generic_trap: 2,
                trap_oid: ".1.3.6.1.6.3.1.1.5.3".into(),
                ..Default::default()
            },
            varbinds: vec![],
        };
        let data = JsonFormatter::new(false).format_trap(&trap).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&data).unwrap();
        assert_eq!(json["trap_info"]["version"], "v1");
        assert_eq!(json["trap_info"]["trap_oid"], ".1.3.6.1.6.3.1.1.5.3");
        assert_eq!(json["trap_info"]["generic_trap"], 2);
        // Zero-valued v1 fields are omitted.
        assert!(json["trap_info"].get("specific_trap").is_none());
        assert!(json["trap_info"].get("severity").is_none());
    }

    #[test]
    fn test_pretty_output_is_indented() {
        let data = JsonFormatter::new(true).format_batch(&batch()).unwrap();
        assert!(data.windows(2).any(|w| w == b"\n ".as_slice()));
    }
}
