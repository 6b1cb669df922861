//! Trap and inform parsing.
//!
//! Converts received SNMP notification PDUs into the canonical
//! [`Trap`] model. This module owns the protocol-level differences
//! between v1, v2c, and v3 notifications; UDP socket management lives in
//! [`receiver`].

pub mod receiver;

use std::net::SocketAddr;

use async_snmp::pdu::TrapV1Pdu;
use async_snmp::{Value, VarBind};
use chrono::Utc;

pub use receiver::{ParseFn, TrapReceiver, TrapReceiverConfig};

use crate::decode::{fallback_convert, is_error_value, pdu_type_string};
use crate::model::{Device, Metric, Trap, TrapInfo};

/// snmpTrapOID.0, whose value in v2c/v3 notifications is the trap type.
const SNMP_TRAP_OID: &[u32] = &[1, 3, 6, 1, 6, 3, 1, 1, 4, 1, 0];

/// A received notification PDU, normalized across protocol versions.
///
/// v2c/v3 carry the complete varbind list including the `sysUpTime.0` and
/// `snmpTrapOID.0` header varbinds; [`parse`] strips them tolerantly.
#[derive(Debug, Clone)]
pub enum TrapPdu {
    V1(TrapV1Pdu),
    V2c { varbinds: Vec<VarBind> },
    V3 { varbinds: Vec<VarBind> },
}

/// Converts a notification PDU into a [`Trap`].
///
/// `source` is the UDP sender. For v1 the agent-address field of the PDU
/// is authoritative for device identity (it survives NAT); for v2c/v3 the
/// UDP source is used, and a missing source yields an empty IP.
///
/// Informs take the identical path; acknowledging them is the receiver's
/// concern, not the parser's.
pub fn parse(pdu: &TrapPdu, source: Option<SocketAddr>) -> Trap {
    let timestamp = Utc::now();

    match pdu {
        TrapPdu::V1(v1) => Trap {
            timestamp,
            device: Device {
                ip_address: std::net::Ipv4Addr::from(v1.agent_addr).to_string(),
                snmp_version: "1".to_string(),
                ..Default::default()
            },
            trap_info: v1_info(v1),
            varbinds: convert_varbinds(&v1.varbinds),
        },
        TrapPdu::V2c { varbinds } | TrapPdu::V3 { varbinds } => {
            let (version, version_label) = match pdu {
                TrapPdu::V3 { .. } => ("3", "v3"),
                _ => ("2c", "v2c"),
            };
            let (info, payload) = v2_info(varbinds, version_label);
            Trap {
                timestamp,
                device: Device {
                    ip_address: source.map(|a| a.ip().to_string()).unwrap_or_default(),
                    snmp_version: version.to_string(),
                    ..Default::default()
                },
                trap_info: info,
                varbinds: convert_varbinds(payload),
            }
        }
    }
}

/// TrapInfo from a v1 trap PDU.
///
/// v1 traps use a dedicated PDU format instead of embedding the trap OID
/// as a varbind, so the TrapOID is synthesized from the enterprise and
/// trap codes per RFC 3584 §3.1:
///
/// - generic 0-5 → `.1.3.6.1.6.3.1.1.5.<generic+1>`
/// - generic 6 (enterprise-specific) → `<enterprise>.0.<specific>`
fn v1_info(pdu: &TrapV1Pdu) -> TrapInfo {
    let enterprise = normalize_trap_oid(&pdu.enterprise.to_string());

    let trap_oid = if (0..6).contains(&pdu.generic_trap.as_i32()) {
        format!(".1.3.6.1.6.3.1.1.5.{}", pdu.generic_trap.as_i32() + 1)
    } else {
        format!(
            "{}.0.{}",
            enterprise.trim_end_matches('.'),
            pdu.specific_trap
        )
    };

    TrapInfo {
        version: "v1".to_string(),
        enterprise_oid: enterprise,
        generic_trap: pdu.generic_trap.as_i32(),
        specific_trap: pdu.specific_trap,
        trap_oid,
        ..Default::default()
    }
}

/// TrapInfo and payload varbinds from a v2c/v3 notification.
///
/// `snmpTrapOID.0` should be the second varbind, but the list is scanned
/// so agents that omit `sysUpTime.0` still parse. When it is absent the
/// notification is not rejected: every varbind becomes payload and the
/// TrapOID stays empty for a downstream filter to act on.
fn v2_info<'a>(varbinds: &'a [VarBind], version_label: &str) -> (TrapInfo, &'a [VarBind]) {
    let mut info = TrapInfo {
        version: version_label.to_string(),
        ..Default::default()
    };

    let trap_oid_idx = varbinds
        .iter()
        .position(|vb| vb.oid.arcs() == SNMP_TRAP_OID);

    let Some(idx) = trap_oid_idx else {
        return (info, varbinds);
    };

    info.trap_oid = match &varbinds[idx].value {
        Value::ObjectIdentifier(oid) => normalize_trap_oid(&oid.to_string()),
        other => normalize_trap_oid(&fallback_convert(other).tag_string()),
    };

    // Payload is everything after snmpTrapOID.0; sysUpTime.0 and the trap
    // OID itself are header, not data.
    (info, &varbinds[idx + 1..])
}

/// Converts notification varbinds into output metrics. Exception and Null
/// values are silently skipped.
fn convert_varbinds(varbinds: &[VarBind]) -> Vec<Metric> {
    varbinds
        .iter()
        .filter(|vb| !is_error_value(&vb.value))
        .map(|vb| {
            let oid = normalize_trap_oid(&vb.oid.to_string());
            Metric {
                name: oid.clone(),
                oid,
                instance: String::new(),
                value: convert_trap_value(&vb.value),
                snmp_type: pdu_type_string(&vb.value),
                syntax: String::new(),
                tags: Default::default(),
            }
        })
        .collect()
}

/// Trap varbinds have no configured syntax, so conversion is driven by the
/// PDU type alone. OID values keep the trap-side leading-dot form.
fn convert_trap_value(value: &Value) -> crate::model::MetricValue {
    use crate::model::MetricValue;
    match value {
        Value::ObjectIdentifier(oid) => MetricValue::Str(normalize_trap_oid(&oid.to_string())),
        Value::OctetString(b) if !is_printable(b) => MetricValue::Bytes(b.to_vec()),
        other => fallback_convert(other),
    }
}

/// Printable ASCII plus common whitespace; anything else is forwarded as
/// raw bytes rather than mangled text.
fn is_printable(bytes: &[u8]) -> bool {
    bytes.iter().all(|&c| {
        (0x20..=0x7e).contains(&c) || c == b'\t' || c == b'\n' || c == b'\r'
    })
}

/// Trap-side OID normal form: leading dot, no trailing dot. (Poll-side
/// OIDs use the opposite, dot-less form; the output schemas differ.)
fn normalize_trap_oid(oid: &str) -> String {
    let trimmed = oid.trim().trim_end_matches('.');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('.') {
        trimmed.to_string()
    } else {
        format!(".{trimmed}")
    }
}
