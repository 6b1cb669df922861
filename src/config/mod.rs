//! Configuration model and YAML loading.
//!
//! The [`Snapshot`] is the fully parsed, immutable form of all configuration
//! trees. The scheduler resolves it into poll jobs; [`crate::pipeline`]
//! swaps in a fresh snapshot on hot reload.

mod device;
mod loader;
mod object;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

pub use device::{DeviceConfig, DeviceDefaults, DeviceGroup, ObjectGroup, V3Credentials};
pub use loader::load;
pub use object::{
    AttributeDefinition, IndexDefinition, ObjectDefinition, OverrideRef, Rediscover, normalize_oid,
};

use crate::produce::EnumRegistry;

/// Directory locations for every configuration tree.
#[derive(Debug, Clone)]
pub struct Paths {
    pub devices: PathBuf,
    pub defaults: PathBuf,
    pub device_groups: PathBuf,
    pub object_groups: PathBuf,
    pub objects: PathBuf,
    pub enums: PathBuf,
}

impl Paths {
    /// Reads each path from its environment variable, falling back to the
    /// documented default when unset or empty.
    pub fn from_env() -> Self {
        Self {
            devices: env_or(
                "INPUT_SNMP_DEVICE_DEFINITIONS_DIRECTORY_PATH",
                "/etc/snmp-collector/snmp/devices",
            ),
            defaults: env_or(
                "INPUT_SNMP_DEFAULTS_DIRECTORY_PATH",
                "/etc/snmp-collector/snmp/defaults",
            ),
            device_groups: env_or(
                "INPUT_SNMP_DEVICE_GROUP_DEFINITIONS_DIRECTORY_PATH",
                "/etc/snmp-collector/snmp/device_groups",
            ),
            object_groups: env_or(
                "INPUT_SNMP_OBJECT_GROUP_DEFINITIONS_DIRECTORY_PATH",
                "/etc/snmp-collector/snmp/object_groups",
            ),
            objects: env_or(
                "INPUT_SNMP_OBJECT_DEFINITIONS_DIRECTORY_PATH",
                "/etc/snmp-collector/snmp/objects",
            ),
            enums: env_or(
                "PROCESSOR_SNMP_ENUM_DEFINITIONS_DIRECTORY_PATH",
                "/etc/snmp-collector/snmp/enums",
            ),
        }
    }
}

fn env_or(key: &str, default: &str) -> PathBuf {
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => PathBuf::from(v),
        _ => PathBuf::from(default),
    }
}

/// The fully parsed, immutable representation of all configuration trees.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Hostname → resolved device configuration (defaults merged in).
    pub devices: HashMap<String, DeviceConfig>,
    /// Group name → device group.
    pub device_groups: HashMap<String, DeviceGroup>,
    /// Group name → object group.
    pub object_groups: HashMap<String, ObjectGroup>,
    /// Object key (e.g. "IF-MIB::ifEntry") → definition.
    pub objects: HashMap<String, Arc<ObjectDefinition>>,
    /// Populated enum registry ready for the producer. Empty when the enums
    /// directory is absent.
    pub enums: Arc<EnumRegistry>,
}
