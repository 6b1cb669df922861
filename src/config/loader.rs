//! YAML configuration loading.
//!
//! Reads six directory trees (driven by environment variables, overridable
//! from the CLI) and produces a [`Snapshot`] consumed by the rest of the
//! pipeline:
//!
//! ```text
//! INPUT_SNMP_DEVICE_DEFINITIONS_DIRECTORY_PATH       → devices map
//! INPUT_SNMP_DEFAULTS_DIRECTORY_PATH                 → merged defaults
//! INPUT_SNMP_DEVICE_GROUP_DEFINITIONS_DIRECTORY_PATH → device groups map
//! INPUT_SNMP_OBJECT_GROUP_DEFINITIONS_DIRECTORY_PATH → object groups map
//! INPUT_SNMP_OBJECT_DEFINITIONS_DIRECTORY_PATH       → object definitions map
//! PROCESSOR_SNMP_ENUM_DEFINITIONS_DIRECTORY_PATH     → enum registry
//! ```
//!
//! A missing directory yields an empty section so partial deployments work.
//! Malformed files are logged and skipped; hard errors are accumulated and
//! reported together so operators see every problem at once.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::device::{
    DeviceConfig, DeviceDefaults, DeviceGroup, ObjectGroup, RawDeviceEntry, resolve_device,
};
use crate::config::object::{
    AttributeDefinition, IndexDefinition, ObjectDefinition, OverrideRef, Rediscover, normalize_oid,
};
use crate::config::{Paths, Snapshot};
use crate::error::{Error, Result};
use crate::produce::EnumRegistry;

/// Loads every configuration directory in `paths` into a [`Snapshot`].
pub fn load(paths: &Paths) -> Result<Snapshot> {
    let mut errs = Vec::new();

    let defaults = collect(load_device_defaults(&paths.defaults), &mut errs);
    let devices = collect(load_devices(&paths.devices, &defaults), &mut errs);
    let device_groups = collect(load_device_groups(&paths.device_groups), &mut errs);
    let object_groups = collect(load_object_groups(&paths.object_groups), &mut errs);
    let objects = collect(load_object_defs(&paths.objects), &mut errs);
    let enums = collect(load_enums(&paths.enums, &objects), &mut errs);

    if !errs.is_empty() {
        return Err(Error::Config(format!(
            "{} error(s):\n  {}",
            errs.len(),
            errs.join("\n  ")
        )));
    }

    Ok(Snapshot {
        devices,
        device_groups,
        object_groups,
        objects,
        enums,
    })
}

fn collect<T: Default>(res: Result<T>, errs: &mut Vec<String>) -> T {
    match res {
        Ok(v) => v,
        Err(e) => {
            errs.push(e.to_string());
            T::default()
        }
    }
}

// ============================================================================
// Device defaults
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawDefaultsFile {
    #[serde(default)]
    default: RawDeviceEntry,
}

fn load_device_defaults(dir: &Path) -> Result<DeviceDefaults> {
    let mut merged = DeviceDefaults::default();
    for path in yaml_files(dir)? {
        let raw: RawDefaultsFile = match decode_file(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed defaults file");
                continue;
            }
        };
        merge_defaults(&mut merged, raw.default);
        debug!(file = %path.display(), "loaded device defaults");
    }
    Ok(merged)
}

/// Fills zero fields in `dst` with values from `src`; first file wins.
fn merge_defaults(dst: &mut DeviceDefaults, src: RawDeviceEntry) {
    if dst.port == 0 {
        dst.port = src.port;
    }
    if dst.poll_interval == 0 {
        dst.poll_interval = src.poll_interval;
    }
    if dst.timeout_ms == 0 {
        dst.timeout_ms = src.timeout_ms;
    }
    if dst.retries == 0 {
        dst.retries = src.retries;
    }
    if dst.version.is_empty() {
        dst.version = src.version;
    }
    if dst.communities.is_empty() {
        dst.communities = src.communities;
    }
    if dst.device_groups.is_empty() {
        dst.device_groups = src.device_groups;
    }
    if dst.max_concurrent_polls == 0 {
        dst.max_concurrent_polls = src.max_concurrent_polls;
    }
}

// ============================================================================
// Devices
// ============================================================================

fn load_devices(dir: &Path, defaults: &DeviceDefaults) -> Result<HashMap<String, DeviceConfig>> {
    let mut result = HashMap::new();
    for path in yaml_files(dir)? {
        let raw: HashMap<String, RawDeviceEntry> = match decode_file(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed device file");
                continue;
            }
        };
        let count = raw.len();
        for (hostname, entry) in raw {
            result.insert(hostname, resolve_device(entry, defaults));
        }
        debug!(file = %path.display(), count, "loaded device file");
    }
    Ok(result)
}

// ============================================================================
// Device groups / object groups
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawDeviceGroup {
    #[serde(default)]
    object_groups: Vec<String>,
}

fn load_device_groups(dir: &Path) -> Result<HashMap<String, DeviceGroup>> {
    let mut result = HashMap::new();
    for path in yaml_files(dir)? {
        let raw: HashMap<String, RawDeviceGroup> = match decode_file(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed device_group file");
                continue;
            }
        };
        for (name, g) in raw {
            result.insert(
                name,
                DeviceGroup {
                    object_groups: g.object_groups,
                },
            );
        }
    }
    Ok(result)
}

#[derive(Debug, Deserialize)]
struct RawObjectGroup {
    #[serde(default)]
    objects: Vec<String>,
}

fn load_object_groups(dir: &Path) -> Result<HashMap<String, ObjectGroup>> {
    let mut result = HashMap::new();
    for path in yaml_files(dir)? {
        let raw: HashMap<String, RawObjectGroup> = match decode_file(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed object_group file");
                continue;
            }
        };
        for (name, g) in raw {
            result.insert(name, ObjectGroup { objects: g.objects });
        }
    }
    Ok(result)
}

// ============================================================================
// Object definitions
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawObjectBody {
    #[serde(default)]
    mib: String,
    #[serde(default)]
    object: String,
    #[serde(default)]
    augments: String,
    #[serde(default)]
    index: Vec<RawIndexBody>,
    #[serde(default)]
    discovery_attribute: String,
    #[serde(default)]
    attributes: HashMap<String, RawAttributeBody>,
}

#[derive(Debug, Deserialize)]
struct RawIndexBody {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    oid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    syntax: String,
}

#[derive(Debug, Deserialize)]
struct RawAttributeBody {
    #[serde(default)]
    oid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    syntax: String,
    #[serde(default, rename = "tag")]
    is_tag: bool,
    #[serde(default)]
    overrides: Option<RawOverride>,
    #[serde(default)]
    rediscover: String,
}

#[derive(Debug, Deserialize)]
struct RawOverride {
    #[serde(default)]
    object: String,
    #[serde(default)]
    attribute: String,
}

fn load_object_defs(dir: &Path) -> Result<HashMap<String, Arc<ObjectDefinition>>> {
    let mut result = HashMap::new();
    for path in yaml_files(dir)? {
        let raw: HashMap<String, RawObjectBody> = match decode_file(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed object file");
                continue;
            }
        };
        let count = raw.len();
        for (key, body) in raw {
            let def = convert_object_def(&key, body);
            warn_duplicate_oids(&def);
            result.insert(key, Arc::new(def));
        }
        debug!(file = %path.display(), count, "loaded objects file");
    }
    Ok(result)
}

/// Attributes within one object must have distinct OIDs; a collision makes
/// decoding ambiguous, so the later definition silently shadows the
/// earlier one in the decoder's lookup table.
fn warn_duplicate_oids(def: &ObjectDefinition) {
    let mut seen: HashMap<&str, &str> = HashMap::new();
    for (name, attr) in &def.attributes {
        if let Some(previous) = seen.insert(attr.oid.as_str(), name.as_str()) {
            warn!(
                object = %def.key,
                oid = %attr.oid,
                attributes = %format!("{previous}, {name}"),
                "attributes share an OID"
            );
        }
    }
}

fn convert_object_def(key: &str, b: RawObjectBody) -> ObjectDefinition {
    let index = b
        .index
        .into_iter()
        .map(|idx| IndexDefinition {
            kind: idx.kind,
            oid: normalize_oid(&idx.oid).to_string(),
            name: idx.name,
            syntax: idx.syntax,
        })
        .collect();

    let attributes = b
        .attributes
        .into_iter()
        .map(|(name, a)| {
            let overrides = a.overrides.map(|o| OverrideRef {
                object: o.object,
                attribute: o.attribute,
            });
            (
                name,
                AttributeDefinition {
                    oid: normalize_oid(&a.oid).to_string(),
                    name: a.name,
                    syntax: a.syntax,
                    is_tag: a.is_tag,
                    overrides,
                    rediscover: Rediscover::parse(&a.rediscover),
                },
            )
        })
        .collect();

    ObjectDefinition {
        key: key.to_string(),
        mib: b.mib,
        object: b.object,
        augments: b.augments,
        index,
        discovery_attribute: b.discovery_attribute,
        attributes,
    }
}

// ============================================================================
// Enum definitions
// ============================================================================

/// Reads every YAML file under `dir` into an [`EnumRegistry`].
///
/// Object definitions are consulted to flag OIDs whose syntax is EnumBitmap
/// so bitmap tables are registered correctly.
fn load_enums(
    dir: &Path,
    objects: &HashMap<String, Arc<ObjectDefinition>>,
) -> Result<Arc<EnumRegistry>> {
    let registry = EnumRegistry::new();

    let mut bitmap_oids: std::collections::HashSet<String> = std::collections::HashSet::new();
    for def in objects.values() {
        for attr in def.attributes.values() {
            if attr.syntax == "EnumBitmap" {
                bitmap_oids.insert(normalize_oid(&attr.oid).to_string());
            }
        }
    }

    for path in yaml_files(dir)? {
        let raw: HashMap<String, serde_yaml::Value> = match decode_file(&path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(file = %path.display(), error = %e, "skipping malformed enum file");
                continue;
            }
        };

        for (oid, val) in raw {
            let norm = normalize_oid(&oid);
            match val {
                // OID enum: the value is a label string, the key is the OID.
                serde_yaml::Value::String(label) => registry.register_oid_enum(norm, &label),

                // Integer / bitmap enum: keys are integers (or integer strings).
                serde_yaml::Value::Mapping(map) => match parse_int_enum_map(map) {
                    Ok(values) => {
                        registry.register_int_enum(norm, bitmap_oids.contains(norm), values)
                    }
                    Err(e) => {
                        warn!(oid = %oid, error = %e, "skipping unparseable int enum");
                    }
                },

                other => {
                    warn!(oid = %oid, kind = ?other, "unknown enum value type");
                }
            }
        }
        debug!(file = %path.display(), "loaded enum file");
    }

    Ok(Arc::new(registry))
}

fn parse_int_enum_map(map: serde_yaml::Mapping) -> Result<HashMap<i64, String>> {
    let mut out = HashMap::with_capacity(map.len());
    for (k, v) in map {
        let key = match &k {
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| Error::Config(format!("non-integer enum key {n:?}")))?,
            serde_yaml::Value::String(s) => s
                .parse::<i64>()
                .map_err(|e| Error::Config(format!("non-integer enum key {s:?}: {e}")))?,
            other => return Err(Error::Config(format!("non-integer enum key {other:?}"))),
        };
        let label = match v {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Number(n) => n.to_string(),
            serde_yaml::Value::Bool(b) => b.to_string(),
            other => return Err(Error::Config(format!("non-scalar enum label {other:?}"))),
        };
        out.insert(key, label);
    }
    Ok(out)
}

// ============================================================================
// Helpers
// ============================================================================

/// All `*.yml` / `*.yaml` files under `dir`, recursively, sorted by path.
/// A missing directory yields an empty list.
fn yaml_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    if !dir.exists() {
        return Ok(paths);
    }
    walk(dir, &mut paths)?;
    paths.sort();
    Ok(paths)
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)
        .map_err(|e| Error::Config(format!("list config dir {}: {e}", dir.display())))?
    {
        let entry = entry.map_err(|e| Error::Config(format!("read config dir entry: {e}")))?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, out)?;
        } else if matches!(
            path.extension().and_then(|s| s.to_str()),
            Some("yml") | Some("yaml")
        ) {
            out.push(path);
        }
    }
    Ok(())
}

fn decode_file<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let file = std::fs::File::open(path)?;
    serde_yaml::from_reader(file).map_err(|e| Error::Config(format!("{}: {e}", path.display())))
}
