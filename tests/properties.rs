//! Property-based tests for the collector's algebraic invariants.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use snmp_collector::config::{
    AttributeDefinition, DeviceConfig, DeviceGroup, ObjectDefinition, ObjectGroup, Rediscover,
    Snapshot,
};
use snmp_collector::model::MetricValue;
use snmp_collector::produce::{
    CounterKey, CounterState, EnumRegistry, WRAP_COUNTER32, WRAP_COUNTER64,
};
use snmp_collector::schedule::resolve_jobs;

// ============================================================================
// Strategies
// ============================================================================

fn arb_metric_value() -> impl Strategy<Value = MetricValue> {
    prop_oneof![
        any::<i64>().prop_map(MetricValue::Int),
        any::<u64>().prop_map(MetricValue::Uint),
        any::<f64>().prop_map(MetricValue::Float),
        "[a-zA-Z0-9./]{0,24}".prop_map(MetricValue::Str),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(MetricValue::Bytes),
        any::<bool>().prop_map(MetricValue::Bool),
    ]
}

fn arb_oid_string() -> impl Strategy<Value = String> {
    prop::collection::vec(0u32..1024, 2..10)
        .prop_map(|arcs| arcs.iter().map(u32::to_string).collect::<Vec<_>>().join("."))
}

/// A small random device/group hierarchy where every reference resolves.
fn arb_snapshot() -> impl Strategy<Value = Snapshot> {
    let objects = prop::collection::hash_set("[a-z]{1,6}", 1..5);
    let hosts = prop::collection::hash_set("[a-z]{1,8}", 1..5);
    (objects, hosts, any::<u64>()).prop_map(|(objects, hosts, seed)| {
        let objects: Vec<String> = objects.into_iter().collect();
        let object_defs: HashMap<String, Arc<ObjectDefinition>> = objects
            .iter()
            .map(|key| {
                (
                    key.clone(),
                    Arc::new(ObjectDefinition {
                        key: key.clone(),
                        attributes: HashMap::from([(
                            "a".to_string(),
                            AttributeDefinition {
                                oid: "1.3.6.1.2.1.1.1".into(),
                                name: "m".into(),
                                syntax: "DisplayString".into(),
                                is_tag: false,
                                overrides: None,
                                rediscover: Rediscover::None,
                            },
                        )]),
                        ..Default::default()
                    }),
                )
            })
            .collect();

        // Two object groups carving up (and overlapping) the object list,
        // two device groups referencing them.
        let split = (seed as usize % objects.len()).max(1);
        let object_groups = HashMap::from([
            (
                "og-a".to_string(),
                ObjectGroup {
                    objects: objects[..split].to_vec(),
                },
            ),
            (
                "og-b".to_string(),
                ObjectGroup {
                    objects: objects.clone(),
                },
            ),
        ]);
        let device_groups = HashMap::from([
            (
                "dg-a".to_string(),
                DeviceGroup {
                    object_groups: vec!["og-a".into(), "og-b".into()],
                },
            ),
            (
                "dg-b".to_string(),
                DeviceGroup {
                    object_groups: vec!["og-b".into()],
                },
            ),
        ]);

        let devices: HashMap<String, DeviceConfig> = hosts
            .into_iter()
            .enumerate()
            .map(|(i, host)| {
                let groups = match i % 3 {
                    0 => vec!["dg-a".to_string()],
                    1 => vec!["dg-b".to_string()],
                    _ => vec!["dg-a".to_string(), "dg-b".to_string()],
                };
                (
                    host,
                    DeviceConfig {
                        ip: "10.0.0.1".into(),
                        port: 161,
                        poll_interval: 60,
                        timeout_ms: 1000,
                        retries: 1,
                        exponential_timeout: false,
                        version: "2c".into(),
                        communities: vec!["public".into()],
                        v3_credentials: vec![],
                        device_groups: groups,
                        max_concurrent_polls: 4,
                        vendor: String::new(),
                        model: String::new(),
                        tags: HashMap::new(),
                    },
                )
            })
            .collect();

        Snapshot {
            devices,
            device_groups,
            object_groups,
            objects: object_defs,
            enums: Default::default(),
        }
    })
}

// ============================================================================
// Scheduler resolution
// ============================================================================

proptest! {
    /// Resolution is idempotent and independent of group declaration
    /// order, and each (device, object) pair appears exactly once no
    /// matter how many paths reach it.
    #[test]
    fn resolution_is_idempotent_and_order_independent(snapshot in arb_snapshot()) {
        let jobs = |snap: &Snapshot| -> Vec<(String, String)> {
            resolve_jobs(snap)
                .iter()
                .map(|j| (j.hostname.clone(), j.object.key.clone()))
                .collect()
        };

        let first = jobs(&snapshot);
        let second = jobs(&snapshot);
        prop_assert_eq!(&first, &second);

        // Permute the object list inside each group.
        let mut permuted = snapshot.clone();
        for group in permuted.object_groups.values_mut() {
            group.objects.reverse();
        }
        for group in permuted.device_groups.values_mut() {
            group.object_groups.reverse();
        }
        let third: HashSet<(String, String)> = jobs(&permuted).into_iter().collect();
        let first_set: HashSet<(String, String)> = first.iter().cloned().collect();
        prop_assert_eq!(&first_set, &third);

        // No duplicates.
        prop_assert_eq!(first.len(), first_set.len());
    }
}

// ============================================================================
// Counter delta algebra
// ============================================================================

proptest! {
    /// Between non-wrapping samples, deltas telescope: the sum equals
    /// last − first.
    #[test]
    fn counter_deltas_telescope(mut samples in prop::collection::vec(any::<u32>(), 2..20)) {
        samples.sort_unstable();
        let state = CounterState::new();
        let key = || CounterKey {
            device: "d".into(),
            attribute: "a".into(),
            instance: "1".into(),
        };
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let mut sum = 0u64;
        for (i, v) in samples.iter().enumerate() {
            let res = state.delta(
                key(),
                u64::from(*v),
                t0 + Duration::seconds(i as i64 + 1),
                WRAP_COUNTER32,
            );
            if i == 0 {
                prop_assert!(!res.valid);
            } else {
                prop_assert!(res.valid);
                sum += res.delta;
            }
        }
        prop_assert_eq!(
            sum,
            u64::from(samples[samples.len() - 1]) - u64::from(samples[0])
        );
    }

    /// A single wrap contributes the distance to the boundary plus the
    /// new value plus one.
    #[test]
    fn counter_wrap_identity(prev in 1u64..WRAP_COUNTER32, current in 0u64..1_000_000u64) {
        prop_assume!(current < prev);
        let state = CounterState::new();
        let key = CounterKey {
            device: "d".into(),
            attribute: "a".into(),
            instance: "1".into(),
        };
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        state.delta(key.clone(), prev, t0, WRAP_COUNTER32);
        let res = state.delta(key, current, t0 + Duration::seconds(60), WRAP_COUNTER32);
        prop_assert!(res.valid);
        prop_assert_eq!(res.delta, (WRAP_COUNTER32 - prev) + current + 1);
    }

    /// Counter64 wraps use the full 64-bit boundary.
    #[test]
    fn counter64_wrap_identity(gap in 1u64..1_000_000, current in 0u64..1_000_000) {
        let prev = WRAP_COUNTER64 - gap;
        let state = CounterState::new();
        let key = CounterKey {
            device: "d".into(),
            attribute: "a".into(),
            instance: "1".into(),
        };
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        state.delta(key.clone(), prev, t0, WRAP_COUNTER64);
        let res = state.delta(key, current, t0 + Duration::seconds(60), WRAP_COUNTER64);
        prop_assert!(res.valid);
        prop_assert_eq!(res.delta, gap + current);
    }
}

// ============================================================================
// Enum resolution totality
// ============================================================================

proptest! {
    /// Resolution never panics and always returns either a registered
    /// label or the original value.
    #[test]
    fn enum_resolution_is_total(
        oid in arb_oid_string(),
        value in arb_metric_value(),
        labels in prop::collection::hash_map(0i64..16, "[a-z]{1,8}", 0..8),
    ) {
        let registry = EnumRegistry::new();
        registry.register_int_enum("1.3.6.1.2.1.2.2.1.8", false, labels.clone());

        let resolved = registry.resolve(&oid, value.clone());
        match (&resolved, &value) {
            // Either a label...
            (MetricValue::Str(s), _) if labels.values().any(|l| l == s) => {}
            // ...or the input unchanged.
            _ => prop_assert_eq!(&resolved, &value),
        }
    }
}
