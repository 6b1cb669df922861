//! Enumeration registry: raw SNMP integer/OID values → text labels.

use std::collections::HashMap;
use std::sync::RwLock;

use crate::config::normalize_oid;
use crate::model::MetricValue;

/// Integer values (and bitmap bit positions) → text labels for one OID.
#[derive(Debug, Clone, Default)]
pub struct IntEnum {
    pub is_bitmap: bool,
    pub values: HashMap<i64, String>,
}

/// Per-OID translation tables for integer, bitmap, and OID enumerations.
///
/// Tables are keyed by the base attribute OID without a leading dot and with
/// no instance suffix. Writes happen only at load/reload; [`resolve`] takes a
/// read lock so producer workers can resolve concurrently.
///
/// [`resolve`]: EnumRegistry::resolve
#[derive(Debug, Default)]
pub struct EnumRegistry {
    inner: RwLock<Tables>,
}

#[derive(Debug, Default)]
struct Tables {
    ints: HashMap<String, IntEnum>,
    oids: HashMap<String, String>,
}

impl EnumRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces an integer enumeration for the given OID.
    pub fn register_int_enum(&self, oid: &str, is_bitmap: bool, values: HashMap<i64, String>) {
        let oid = normalize_oid(oid).to_string();
        let mut tables = self.inner.write().unwrap();
        tables.ints.insert(oid, IntEnum { is_bitmap, values });
    }

    /// Adds an OID-to-label mapping (OID enumeration type).
    pub fn register_oid_enum(&self, oid: &str, label: &str) {
        let oid = normalize_oid(oid).to_string();
        let mut tables = self.inner.write().unwrap();
        tables.oids.insert(oid, label.to_string());
    }

    /// Number of registered tables (for logging and tests).
    pub fn len(&self) -> usize {
        let tables = self.inner.read().unwrap();
        tables.ints.len() + tables.oids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Translates a raw value to its text label using the table registered
    /// for `oid` (base attribute OID, no leading dot, no instance suffix).
    ///
    /// Resolution is total: when no table is registered or no label matches,
    /// the raw value is returned unchanged. Missing enum files never break
    /// the pipeline.
    pub fn resolve(&self, oid: &str, raw: MetricValue) -> MetricValue {
        let oid = normalize_oid(oid);
        let tables = self.inner.read().unwrap();

        // OID enumeration: the attribute OID itself, or the OID-typed value.
        if let Some(label) = tables.oids.get(oid) {
            return MetricValue::Str(label.clone());
        }
        if let MetricValue::Str(ref s) = raw {
            if let Some(label) = tables.oids.get(normalize_oid(s)) {
                return MetricValue::Str(label.clone());
            }
        }

        // Integer or bitmap enumeration.
        let Some(int_enum) = tables.ints.get(oid) else {
            return raw;
        };
        let Some(value) = raw.as_i64() else {
            return raw;
        };

        if int_enum.is_bitmap {
            return resolve_bitmap(&int_enum.values, value, raw);
        }

        match int_enum.values.get(&value) {
            Some(label) => MetricValue::Str(label.clone()),
            None => raw,
        }
    }
}

/// Comma-joined list of labels whose bit is set, in ascending bit order.
/// Falls back to the raw mask when no bit matches a label.
fn resolve_bitmap(values: &HashMap<i64, String>, mask: i64, raw: MetricValue) -> MetricValue {
    let mut active = Vec::new();
    for bit in 0..64i64 {
        if mask & (1 << bit) != 0 {
            if let Some(label) = values.get(&bit) {
                active.push(label.as_str());
            }
        }
    }
    if active.is_empty() {
        raw
    } else {
        MetricValue::Str(active.join(","))
    }
}
