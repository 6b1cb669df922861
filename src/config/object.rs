//! Managed-object definitions.
//!
//! An [`ObjectDefinition`] is the parsed form of a single object YAML file
//! (e.g. `IF-MIB_ifEntry.yml`). The decoder uses it to map a raw OID from an
//! SNMP PDU back to an attribute name and syntax.

use std::collections::HashMap;

/// When an index entry triggers re-discovery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Rediscover {
    #[default]
    None,
    OnChange,
    OnReset,
}

impl Rediscover {
    /// Parse the configuration string form; unknown strings mean no policy.
    pub fn parse(s: &str) -> Self {
        match s {
            "OnChange" => Self::OnChange,
            "OnReset" => Self::OnReset,
            _ => Self::None,
        }
    }
}

/// Identifies the object + attribute that a newer attribute supersedes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideRef {
    /// ObjectDefinition key, e.g. "IF-MIB::ifEntry".
    pub object: String,
    /// Attribute name within that object, e.g. "ifInOctets".
    pub attribute: String,
}

/// A single component of a table's OID index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDefinition {
    /// OID index encoding, e.g. "Integer", "IpAddress", "OctetString".
    pub kind: String,
    /// Numeric OID of the index object, stored without a leading dot.
    pub oid: String,
    /// Semantic name assigned to this index in the output, e.g. "netif".
    pub name: String,
    /// Display/conversion hint for the index value.
    pub syntax: String,
}

/// A single column within an SNMP table, or a scalar field.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDefinition {
    /// Full numeric OID of the attribute, stored without a leading dot.
    pub oid: String,
    /// Metric name used in the output, e.g. "netif.bytes.in".
    pub name: String,
    /// Controls how the raw SNMP value is converted and normalized.
    pub syntax: String,
    /// True when this attribute is a dimension label rather than a metric.
    pub is_tag: bool,
    /// The object + attribute this attribute replaces (e.g. the Counter64
    /// variant overriding its Counter32 sibling).
    pub overrides: Option<OverrideRef>,
    pub rediscover: Rediscover,
}

/// A named managed object, e.g. `IF-MIB::ifEntry`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectDefinition {
    /// Canonical key, e.g. "IF-MIB::ifEntry".
    pub key: String,
    /// MIB module name, e.g. "IF-MIB".
    pub mib: String,
    /// Object name within the MIB, e.g. "ifEntry".
    pub object: String,
    /// When non-empty, references another object whose index this one shares.
    pub augments: String,
    /// Table index components in declaration order. Empty for scalars.
    pub index: Vec<IndexDefinition>,
    /// Attribute used to detect whether a table row is present.
    pub discovery_attribute: String,
    /// All attributes (columns) keyed by attribute name, e.g. "ifInOctets".
    pub attributes: HashMap<String, AttributeDefinition>,
}

impl ObjectDefinition {
    /// A scalar object has no table index; every attribute is a scalar OID.
    pub fn is_scalar(&self) -> bool {
        self.index.is_empty()
    }
}

/// Strips whitespace and a leading dot so OIDs are in canonical form.
pub fn normalize_oid(oid: &str) -> &str {
    oid.trim().trim_start_matches('.')
}
