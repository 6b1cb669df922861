//! Device configuration and group types.

use std::collections::HashMap;

use serde::Deserialize;

/// Fully-resolved configuration for a single monitored device.
///
/// Optional fields that are zero-valued in the YAML are filled from the
/// merged defaults, then from hard-coded fallbacks, during resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    /// Management IP address.
    pub ip: String,
    /// UDP port for SNMP requests (default 161).
    pub port: u16,
    /// Polling interval in seconds (default 60).
    pub poll_interval: u64,
    /// Per-request timeout in milliseconds (default 3000).
    pub timeout_ms: u64,
    /// Retry attempts on timeout (default 2).
    pub retries: u32,
    /// Exponential backoff between retries.
    pub exponential_timeout: bool,
    /// SNMP version: "1", "2c", or "3".
    pub version: String,
    /// Community strings to try (v1/v2c only). The first one is used.
    pub communities: Vec<String>,
    /// SNMPv3 credential sets to try (v3 only). The first one is used.
    pub v3_credentials: Vec<V3Credentials>,
    /// Device group names applied to this device.
    pub device_groups: Vec<String>,
    /// Concurrent in-flight SNMP requests allowed to this device (default 4).
    pub max_concurrent_polls: usize,
    /// Static vendor label for output records.
    pub vendor: String,
    /// Static model label for output records.
    pub model: String,
    /// Static tags copied onto every output record for this device.
    pub tags: HashMap<String, String>,
}

impl DeviceConfig {
    /// The "ip:port" target string for dialing.
    pub fn target(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

/// A single set of SNMPv3 security parameters.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct V3Credentials {
    /// SNMPv3 security name.
    pub username: String,
    /// One of: noauth, md5, sha, sha224, sha256, sha384, sha512.
    #[serde(default)]
    pub authentication_protocol: String,
    #[serde(default)]
    pub authentication_passphrase: String,
    /// One of: nopriv, des, aes, aes192, aes256.
    #[serde(default)]
    pub privacy_protocol: String,
    #[serde(default)]
    pub privacy_passphrase: String,
}

/// Object group names applied to devices in a device group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceGroup {
    pub object_groups: Vec<String>,
}

/// Object definition keys belonging to an object group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectGroup {
    pub objects: Vec<String>,
}

/// Global device defaults, merged across all defaults files.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeviceDefaults {
    pub port: u16,
    pub poll_interval: u64,
    pub timeout_ms: u64,
    pub retries: u32,
    pub version: String,
    pub communities: Vec<String>,
    pub device_groups: Vec<String>,
    pub max_concurrent_polls: usize,
}

/// Intermediate YAML-decoded form of a single device entry. Maps 1-to-1
/// with the device YAML schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawDeviceEntry {
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub poll_interval: u64,
    #[serde(default, rename = "timeout")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub exponential_timeout: bool,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub communities: Vec<String>,
    #[serde(default)]
    pub v3_credentials: Vec<V3Credentials>,
    #[serde(default)]
    pub device_groups: Vec<String>,
    #[serde(default)]
    pub max_concurrent_polls: usize,
    #[serde(default)]
    pub vendor: String,
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

/// Merges a raw device entry with defaults into a resolved `DeviceConfig`.
pub(crate) fn resolve_device(e: RawDeviceEntry, d: &DeviceDefaults) -> DeviceConfig {
    fn pick<T: PartialEq + Default>(own: T, def: T, fallback: T) -> T {
        if own != T::default() {
            own
        } else if def != T::default() {
            def
        } else {
            fallback
        }
    }

    DeviceConfig {
        ip: e.ip,
        port: pick(e.port, d.port, 161),
        poll_interval: pick(e.poll_interval, d.poll_interval, 60),
        timeout_ms: pick(e.timeout_ms, d.timeout_ms, 3000),
        retries: pick(e.retries, d.retries, 2),
        exponential_timeout: e.exponential_timeout,
        version: pick(e.version, d.version.clone(), "2c".to_string()),
        communities: if e.communities.is_empty() {
            d.communities.clone()
        } else {
            e.communities
        },
        v3_credentials: e.v3_credentials,
        device_groups: if e.device_groups.is_empty() {
            d.device_groups.clone()
        } else {
            e.device_groups
        },
        max_concurrent_polls: pick(e.max_concurrent_polls, d.max_concurrent_polls, 4),
        vendor: e.vendor,
        model: e.model,
        tags: e.tags,
    }
}
