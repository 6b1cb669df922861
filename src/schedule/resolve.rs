//! Config-hierarchy resolution: devices → device groups → object groups →
//! object definitions, flattened into poll jobs.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::warn;

use crate::config::Snapshot;
use crate::model::Device;
use crate::poll::PollJob;

/// Walks the hierarchy for every device and returns a flat job list.
///
/// Devices are visited in hostname-sorted order so resolution is
/// deterministic; objects reachable through multiple groups are
/// deduplicated per device. Unknown group or object references are logged
/// and skipped, never fatal.
pub fn resolve_jobs(snapshot: &Snapshot) -> Vec<PollJob> {
    let mut hostnames: Vec<&String> = snapshot.devices.keys().collect();
    hostnames.sort();

    let mut jobs = Vec::new();
    for hostname in hostnames {
        let cfg = &snapshot.devices[hostname];
        let device = Device {
            hostname: hostname.clone(),
            ip_address: cfg.ip.clone(),
            snmp_version: cfg.version.clone(),
            vendor: cfg.vendor.clone(),
            model: cfg.model.clone(),
            tags: cfg.tags.clone(),
            ..Default::default()
        };

        let mut seen: HashSet<&str> = HashSet::new();
        for dg_name in &cfg.device_groups {
            let Some(dg) = snapshot.device_groups.get(dg_name) else {
                warn!(hostname, group = %dg_name, "unknown device group");
                continue;
            };
            for og_name in &dg.object_groups {
                let Some(og) = snapshot.object_groups.get(og_name) else {
                    warn!(hostname, object_group = %og_name, "unknown object group");
                    continue;
                };
                for obj_key in &og.objects {
                    if !seen.insert(obj_key) {
                        continue;
                    }
                    let Some(object) = snapshot.objects.get(obj_key) else {
                        warn!(hostname, object = %obj_key, "unknown object definition");
                        continue;
                    };
                    jobs.push(PollJob {
                        hostname: hostname.clone(),
                        device: device.clone(),
                        device_config: cfg.clone(),
                        object: Arc::clone(object),
                    });
                }
            }
        }
    }
    jobs
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashMap;

    use crate::config::{
        DeviceConfig, DeviceGroup, ObjectDefinition, ObjectGroup,
    };

    pub(crate) fn device(ip: &str, groups: &[&str]) -> DeviceConfig {
        DeviceConfig {
            ip: ip.into(),
            port: 161,
            poll_interval: 60,
            timeout_ms: 3000,
            retries: 2,
            exponential_timeout: false,
            version: "2c".into(),
            communities: vec!["public".into()],
            v3_credentials: vec![],
            device_groups: groups.iter().map(|s| s.to_string()).collect(),
            max_concurrent_polls: 4,
            vendor: String::new(),
            model: String::new(),
            tags: HashMap::new(),
        }
    }

    fn object_def(key: &str) -> Arc<ObjectDefinition> {
        Arc::new(ObjectDefinition {
            key: key.into(),
            attributes: HashMap::from([(
                "a".into(),
                crate::config::AttributeDefinition {
                    oid: "1.3.6.1.2.1.1.1".into(),
                    name: "m".into(),
                    syntax: "DisplayString".into(),
                    is_tag: false,
                    overrides: None,
                    rediscover: crate::config::Rediscover::None,
                },
            )]),
            ..Default::default()
        })
    }

    pub(crate) fn snapshot() -> Snapshot {
        Snapshot {
            devices: HashMap::from([
                ("sw-b".to_string(), device("10.0.0.2", &["switches"])),
                ("sw-a".to_string(), device("10.0.0.1", &["switches", "all"])),
            ]),
            device_groups: HashMap::from([
                (
                    "switches".to_string(),
                    DeviceGroup {
                        object_groups: vec!["interfaces".into()],
                    },
                ),
                (
                    "all".to_string(),
                    DeviceGroup {
                        object_groups: vec!["interfaces".into(), "system".into()],
                    },
                ),
            ]),
            object_groups: HashMap::from([
                (
                    "interfaces".to_string(),
                    ObjectGroup {
                        objects: vec!["IF-MIB::ifEntry".into()],
                    },
                ),
                (
                    "system".to_string(),
                    ObjectGroup {
                        objects: vec!["SNMPv2-MIB::system".into()],
                    },
                ),
            ]),
            objects: HashMap::from([
                ("IF-MIB::ifEntry".to_string(), object_def("IF-MIB::ifEntry")),
                (
                    "SNMPv2-MIB::system".to_string(),
                    object_def("SNMPv2-MIB::system"),
                ),
            ]),
            enums: Default::default(),
        }
    }

    #[test]
    fn test_resolution_is_sorted_and_deduplicated() {
        let jobs = resolve_jobs(&snapshot());
        let described: Vec<(String, String)> = jobs
            .iter()
            .map(|j| (j.hostname.clone(), j.object.key.clone()))
            .collect();
        // sw-a reaches ifEntry through two paths but polls it once.
        assert_eq!(
            described,
            vec![
                ("sw-a".to_string(), "IF-MIB::ifEntry".to_string()),
                ("sw-a".to_string(), "SNMPv2-MIB::system".to_string()),
                ("sw-b".to_string(), "IF-MIB::ifEntry".to_string()),
            ]
        );
    }

    #[test]
    fn test_unknown_references_are_skipped() {
        let mut snap = snapshot();
        snap.devices
            .insert("broken".into(), device("10.0.0.3", &["missing-group"]));
        snap.object_groups.insert(
            "system".into(),
            ObjectGroup {
                objects: vec!["NO-SUCH::object".into()],
            },
        );
        let jobs = resolve_jobs(&snap);
        assert!(jobs.iter().all(|j| j.hostname != "broken"));
        assert!(jobs.iter().all(|j| j.object.key != "NO-SUCH::object"));
    }

    #[test]
    fn test_device_labels_propagate() {
        let mut snap = snapshot();
        let dev = snap.devices.get_mut("sw-a").unwrap();
        dev.vendor = "cisco".into();
        dev.tags.insert("site".into(), "fra1".into());
        let jobs = resolve_jobs(&snap);
        let job = jobs.iter().find(|j| j.hostname == "sw-a").unwrap();
        assert_eq!(job.device.vendor, "cisco");
        assert_eq!(job.device.tags["site"], "fra1");
    }

    #[test]
    fn test_empty_snapshot_resolves_to_nothing() {
        assert!(resolve_jobs(&Snapshot::default()).is_empty());
    }
}
