//! Raw PDU value → native value conversion.
//!
//! [`convert_value`] dispatches on the attribute's configured syntax string
//! and normalizes units (bandwidth to bits/sec, temperatures to Celsius,
//! power to Watts, and so on). Unknown syntax labels fall back to a
//! conversion driven by the PDU type so that configurations referencing
//! newer syntax never break older collectors.

use async_snmp::Value;

use crate::error::ConvertErrorKind;
use crate::model::MetricValue;

/// Human-readable name for a PDU value's type, used verbatim in output
/// records.
pub fn pdu_type_string(value: &Value) -> String {
    match value {
        Value::Integer(_) => "Integer".into(),
        Value::OctetString(_) => "OctetString".into(),
        Value::Null => "Null".into(),
        Value::ObjectIdentifier(_) => "ObjectIdentifier".into(),
        Value::IpAddress(_) => "IpAddress".into(),
        Value::Counter32(_) => "Counter32".into(),
        Value::Gauge32(_) => "Gauge32".into(),
        Value::TimeTicks(_) => "TimeTicks".into(),
        Value::Opaque(_) => "Opaque".into(),
        Value::Counter64(_) => "Counter64".into(),
        Value::NoSuchObject => "NoSuchObject".into(),
        Value::NoSuchInstance => "NoSuchInstance".into(),
        Value::EndOfMibView => "EndOfMibView".into(),
        Value::Unknown { tag, .. } => format!("Unknown(0x{tag:02X})"),
        _ => "Unknown".into(),
    }
}

/// True when the PDU value signals a retrieval error rather than data.
/// Callers skip these varbinds.
pub fn is_error_value(value: &Value) -> bool {
    matches!(
        value,
        Value::Null | Value::NoSuchObject | Value::NoSuchInstance | Value::EndOfMibView
    )
}

/// Converts a raw PDU value to the native type dictated by the config
/// syntax.
///
/// Enumeration resolution (EnumInteger, EnumObjectIdentifier, ...) is
/// intentionally not performed here; the producer stage owns the enum
/// registry. This function only normalizes the numeric value.
pub fn convert_value(value: &Value, syntax: &str) -> Result<MetricValue, ConvertErrorKind> {
    match syntax {
        // Signed integer types.
        "Integer" | "Integer32" | "InterfaceIndex" | "InterfaceIndexOrZero" | "TruthValue"
        | "RowStatus" | "TimeStamp" | "TimeInterval" | "EnumInteger" | "EnumIntegerKeepID"
        | "EnumBitmap" => Ok(MetricValue::Int(to_i64(value)?)),

        // Unsigned / counter types.
        "Unsigned32" | "Gauge32" | "Counter32" | "Counter64" | "TimeTicks" | "Opaque" => {
            Ok(MetricValue::Uint(to_u64(value)?))
        }

        // String types.
        "DisplayString" | "OctetString" | "DateAndTime" => {
            Ok(MetricValue::Str(to_display_string(value)))
        }

        // Hardware addresses.
        "PhysAddress" | "MacAddress" => Ok(MetricValue::Str(to_mac_string(value))),

        // OID types.
        "ObjectIdentifier" | "EnumObjectIdentifier" | "EnumObjectIdentifierKeepOID" => {
            Ok(MetricValue::Str(to_oid_string(value)))
        }

        // IP addresses.
        "IpAddress" | "IpAddressNoSuffix" => Ok(MetricValue::Str(to_ip_string(value))),

        // Bandwidth, normalized to bits/sec.
        "BandwidthBits" => Ok(MetricValue::Float(to_f64(value)?)),
        "BandwidthKBits" => Ok(MetricValue::Float(to_f64(value)? * 1_000.0)),
        "BandwidthMBits" => Ok(MetricValue::Float(to_f64(value)? * 1_000_000.0)),
        "BandwidthGBits" => Ok(MetricValue::Float(to_f64(value)? * 1_000_000_000.0)),

        // Byte quantities, normalized to bytes.
        "BytesB" => Ok(MetricValue::Uint(to_u64(value)?)),
        "BytesKB" => Ok(MetricValue::Float(to_f64(value)? * 1_000.0)),
        "BytesMB" => Ok(MetricValue::Float(to_f64(value)? * 1_000_000.0)),
        "BytesGB" => Ok(MetricValue::Float(to_f64(value)? * 1_000_000_000.0)),
        "BytesTB" => Ok(MetricValue::Float(to_f64(value)? * 1_000_000_000_000.0)),
        "BytesKiB" => Ok(MetricValue::Float(to_f64(value)? * 1_024.0)),
        "BytesMiB" => Ok(MetricValue::Float(to_f64(value)? * 1_048_576.0)),
        "BytesGiB" => Ok(MetricValue::Float(to_f64(value)? * 1_073_741_824.0)),

        // Temperatures, normalized to Celsius.
        "TemperatureC" => Ok(MetricValue::Float(to_f64(value)?)),
        "TemperatureDeciC" => Ok(MetricValue::Float(to_f64(value)? / 10.0)),
        "TemperatureCentiC" => Ok(MetricValue::Float(to_f64(value)? / 100.0)),

        // Power, normalized to Watts.
        "PowerWatt" => Ok(MetricValue::Float(to_f64(value)?)),
        "PowerMilliWatt" => Ok(MetricValue::Float(to_f64(value)? / 1_000.0)),
        "PowerKiloWatt" => Ok(MetricValue::Float(to_f64(value)? * 1_000.0)),

        // Current, normalized to Amps.
        "CurrentAmp" => Ok(MetricValue::Float(to_f64(value)?)),
        "CurrentMilliAmp" => Ok(MetricValue::Float(to_f64(value)? / 1_000.0)),
        "CurrentMicroAmp" => Ok(MetricValue::Float(to_f64(value)? / 1_000_000.0)),

        // Voltage, normalized to Volts.
        "VoltageVolt" => Ok(MetricValue::Float(to_f64(value)?)),
        "VoltageMilliVolt" => Ok(MetricValue::Float(to_f64(value)? / 1_000.0)),
        "VoltageMicroVolt" => Ok(MetricValue::Float(to_f64(value)? / 1_000_000.0)),

        // Frequency, normalized to Hertz.
        "FreqHz" => Ok(MetricValue::Float(to_f64(value)?)),
        "FreqKHz" => Ok(MetricValue::Float(to_f64(value)? * 1_000.0)),
        "FreqMHz" => Ok(MetricValue::Float(to_f64(value)? * 1_000_000.0)),
        "FreqGHz" => Ok(MetricValue::Float(to_f64(value)? * 1_000_000_000.0)),

        // Duration ticks stay raw; unit normalization is downstream policy.
        "TicksSec" | "TicksMilliSec" | "TicksMicroSec" => Ok(MetricValue::Uint(to_u64(value)?)),

        // Percentages stay raw; downstream may renormalize.
        "Percent1" | "Percent100" | "PercentDeci100" => Ok(MetricValue::Float(to_f64(value)?)),

        _ => Ok(fallback_convert(value)),
    }
}

/// Best-effort conversion driven by the PDU type, used when the syntax
/// label is unrecognized. Total: never fails.
pub fn fallback_convert(value: &Value) -> MetricValue {
    match value {
        Value::Integer(v) => MetricValue::Int(i64::from(*v)),
        Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => {
            MetricValue::Uint(u64::from(*v))
        }
        Value::Counter64(v) => MetricValue::Uint(*v),
        Value::OctetString(_) => MetricValue::Str(to_display_string(value)),
        Value::ObjectIdentifier(oid) => MetricValue::Str(oid.to_string()),
        Value::IpAddress(_) => MetricValue::Str(to_ip_string(value)),
        Value::Opaque(b) => MetricValue::Bytes(b.to_vec()),
        Value::Unknown { data, .. } => MetricValue::Bytes(data.to_vec()),
        other => MetricValue::Str(pdu_type_string(other)),
    }
}

// ============================================================================
// Low-level conversion helpers
// ============================================================================

fn to_i64(value: &Value) -> Result<i64, ConvertErrorKind> {
    match value {
        Value::Integer(v) => Ok(i64::from(*v)),
        Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Ok(i64::from(*v)),
        Value::Counter64(v) => {
            i64::try_from(*v).map_err(|_| ConvertErrorKind::OverflowsI64 { value: *v })
        }
        other => Err(ConvertErrorKind::NonNumeric {
            pdu_type: pdu_type_string(other),
        }),
    }
}

fn to_u64(value: &Value) -> Result<u64, ConvertErrorKind> {
    match value {
        Value::Integer(v) if *v < 0 => Err(ConvertErrorKind::Negative {
            value: i64::from(*v),
        }),
        Value::Integer(v) => Ok(*v as u64),
        Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Ok(u64::from(*v)),
        Value::Counter64(v) => Ok(*v),
        other => Err(ConvertErrorKind::NonNumeric {
            pdu_type: pdu_type_string(other),
        }),
    }
}

fn to_f64(value: &Value) -> Result<f64, ConvertErrorKind> {
    match value {
        Value::Integer(v) => Ok(f64::from(*v)),
        Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => Ok(f64::from(*v)),
        Value::Counter64(v) => Ok(*v as f64),
        other => Err(ConvertErrorKind::NonNumeric {
            pdu_type: pdu_type_string(other),
        }),
    }
}

/// OctetString bytes as UTF-8 text with any trailing NUL bytes stripped.
/// Devices routinely pad fixed-width strings with NULs.
fn to_display_string(value: &Value) -> String {
    match value {
        Value::OctetString(b) | Value::Opaque(b) => {
            let s = String::from_utf8_lossy(b);
            s.trim_end_matches('\0').to_string()
        }
        Value::ObjectIdentifier(oid) => oid.to_string(),
        Value::IpAddress(_) => to_ip_string(value),
        Value::Integer(v) => v.to_string(),
        Value::Counter32(v) | Value::Gauge32(v) | Value::TimeTicks(v) => v.to_string(),
        Value::Counter64(v) => v.to_string(),
        other => pdu_type_string(other),
    }
}

/// PhysAddress formatting: colon-separated lowercase hex. Works for the
/// standard 6-byte MAC and longer forms such as EUI-64.
fn to_mac_string(value: &Value) -> String {
    let bytes: &[u8] = match value {
        Value::OctetString(b) | Value::Opaque(b) => b,
        other => return to_display_string(other),
    };
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}

/// Dotted-decimal OID with no leading dot.
fn to_oid_string(value: &Value) -> String {
    match value {
        Value::ObjectIdentifier(oid) => oid.to_string(),
        Value::OctetString(b) => String::from_utf8_lossy(b)
            .trim_start_matches('.')
            .to_string(),
        other => to_display_string(other),
    }
}

/// IpAddress values as dotted decimal; 16-byte octet strings as IPv6.
fn to_ip_string(value: &Value) -> String {
    match value {
        Value::IpAddress(octets) => std::net::Ipv4Addr::from(*octets).to_string(),
        Value::OctetString(b) if b.len() == 4 => {
            std::net::Ipv4Addr::new(b[0], b[1], b[2], b[3]).to_string()
        }
        Value::OctetString(b) if b.len() == 16 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(b);
            std::net::Ipv6Addr::from(octets).to_string()
        }
        Value::OctetString(b) => b.iter().map(|x| format!("{x:02x}")).collect(),
        other => to_display_string(other),
    }
}
