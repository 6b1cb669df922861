//! Canonical data model shared across all pipeline stages.
//!
//! These types are the in-memory form of everything the collector emits.
//! Every stage depends on this module and it depends on nothing else in the
//! crate, so the dependency graph stays acyclic.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Identifying information about a monitored network device.
///
/// Optional fields are populated as they become known (e.g. from device
/// configuration or sysDescr polling) and are omitted from output when empty.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Device {
    pub hostname: String,
    pub ip_address: String,
    /// "1", "2c", or "3".
    pub snmp_version: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub vendor: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub model: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub sys_descr: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub sys_location: String,
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub sys_contact: String,
    /// Static labels from device configuration.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub tags: HashMap<String, String>,
}

/// A decoded SNMP value.
///
/// The decoder converts every raw PDU value into one of these variants
/// according to the attribute's configured syntax. Serialization emits the
/// bare inner value (a JSON number, string, or bool); byte values are
/// hex-encoded so records stay valid UTF-8.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Int(i64),
    Uint(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Bool(bool),
}

impl MetricValue {
    /// String form used when this value feeds a dimension tag.
    pub fn tag_string(&self) -> String {
        match self {
            Self::Str(s) => s.clone(),
            Self::Int(v) => v.to_string(),
            Self::Uint(v) => v.to_string(),
            Self::Float(v) => v.to_string(),
            Self::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
            Self::Bool(v) => v.to_string(),
        }
    }

    /// Non-panicking conversion to `u64`, used by the counter-delta path.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Uint(v) => Some(*v),
            Self::Int(v) if *v >= 0 => Some(*v as u64),
            _ => None,
        }
    }

    /// Non-panicking conversion to `i64`, used for enum lookups.
    ///
    /// Counter values above `i64::MAX` wrap intentionally; enumeration
    /// tables only ever hold small integers.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(v) => Some(*v),
            Self::Uint(v) => Some(*v as i64),
            _ => None,
        }
    }
}

impl Serialize for MetricValue {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Int(v) => serializer.serialize_i64(*v),
            Self::Uint(v) => serializer.serialize_u64(*v),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::Str(s) => serializer.serialize_str(s),
            Self::Bytes(b) => serializer.serialize_str(&hex_string(b)),
            Self::Bool(v) => serializer.serialize_bool(*v),
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

/// A single resolved SNMP variable binding ready for output.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Metric {
    pub oid: String,
    pub name: String,
    /// Table row index, e.g. "1" for ifIndex 1. Empty for trap varbinds.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub instance: String,
    pub value: MetricValue,
    /// SNMP PDU type: "Counter64", "Integer", etc.
    #[serde(rename = "type")]
    pub snmp_type: String,
    /// Config syntax: "Counter64", "BandwidthMBits", etc.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub syntax: String,
    /// Dimension attributes keyed by attribute name.
    #[serde(skip_serializing_if = "HashMap::is_empty", default)]
    pub tags: HashMap<String, String>,
}

/// Operational metadata about one collection cycle.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MetricMetadata {
    pub collector_id: String,
    pub poll_duration_ms: i64,
    /// "success" | "timeout" | "error".
    pub poll_status: String,
}

/// The top-level payload produced per polling cycle.
#[derive(Debug, Clone, Serialize)]
pub struct MetricBatch {
    pub timestamp: DateTime<Utc>,
    pub device: Device,
    pub metrics: Vec<Metric>,
    pub metadata: MetricMetadata,
}

/// Trap-specific header fields not present in regular polls.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TrapInfo {
    /// "v1", "v2c", or "v3".
    pub version: String,
    /// v1 only.
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub enterprise_oid: String,
    /// v1 only (0-6).
    #[serde(skip_serializing_if = "is_zero_i32", default)]
    pub generic_trap: i32,
    /// v1 only.
    #[serde(skip_serializing_if = "is_zero_i32", default)]
    pub specific_trap: i32,
    /// snmpTrapOID.0 value, or synthesized for v1. Empty when the trap is
    /// missing its header varbind.
    pub trap_oid: String,
    /// Resolved MIB name, e.g. "linkDown".
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub trap_name: String,
    /// "info" | "warning" | "critical".
    #[serde(skip_serializing_if = "String::is_empty", default)]
    pub severity: String,
}

fn is_zero_i32(v: &i32) -> bool {
    *v == 0
}

/// The top-level payload for a received SNMP trap or inform.
#[derive(Debug, Clone, Serialize)]
pub struct Trap {
    pub timestamp: DateTime<Utc>,
    pub device: Device,
    pub trap_info: TrapInfo,
    pub varbinds: Vec<Metric>,
}
