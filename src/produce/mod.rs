//! Metric assembly: decoded varbinds → output-ready batches.
//!
//! The producer groups decoded varbinds by table instance, splits dimension
//! tags from measurements, resolves attribute overrides by syntax priority,
//! applies enum text resolution and counter deltas, and assembles the final
//! [`MetricBatch`]. All mutable state lives in the enum registry (read-only
//! after load) and the counter state (single mutex), so one producer
//! instance is shared by every worker.

mod counter;
mod enums;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

pub use counter::{
    CounterKey, CounterState, DeltaResult, WRAP_COUNTER32, WRAP_COUNTER64, is_counter_syntax,
    wrap_for_syntax,
};
pub use enums::{EnumRegistry, IntEnum};

use crate::decode::{DecodedPollResult, DecodedVarbind};
use crate::model::{Metric, MetricBatch, MetricMetadata, MetricValue};

/// Constructor options for [`MetricProducer`].
#[derive(Debug, Clone, Default)]
pub struct ProducerConfig {
    /// Stable identifier for this collector instance, written into every
    /// batch's metadata. Typically the host or pod name.
    pub collector_id: String,
    /// Resolve EnumInteger / EnumBitmap / EnumObjectIdentifier values to
    /// text labels using the registry.
    pub enum_enabled: bool,
    /// Replace Counter32/Counter64 values with per-interval deltas. When
    /// false, raw cumulative values are forwarded for downstream systems
    /// that compute their own rates.
    pub counter_delta_enabled: bool,
}

/// Options for one [`assemble`] call. `None` fields disable the
/// corresponding feature.
#[derive(Clone, Copy, Default)]
pub struct AssembleOptions<'a> {
    pub collector_id: &'a str,
    /// "success", "timeout", or "error".
    pub poll_status: &'a str,
    pub enums: Option<&'a EnumRegistry>,
    pub counters: Option<&'a CounterState>,
}

/// The production producer. Shared by all producer workers.
#[derive(Debug)]
pub struct MetricProducer {
    cfg: ProducerConfig,
    enums: Option<Arc<EnumRegistry>>,
    counters: Option<CounterState>,
}

impl MetricProducer {
    /// `enums` is consulted only when `cfg.enum_enabled` is set; passing an
    /// empty registry is equivalent to disabling resolution.
    pub fn new(cfg: ProducerConfig, enums: Arc<EnumRegistry>) -> Self {
        let counters = cfg.counter_delta_enabled.then(CounterState::new);
        let enums = cfg.enum_enabled.then_some(enums);
        Self {
            cfg,
            enums,
            counters,
        }
    }

    /// Converts a decoded poll result into a [`MetricBatch`].
    pub fn produce(&self, decoded: &DecodedPollResult) -> MetricBatch {
        let batch = assemble(
            decoded,
            AssembleOptions {
                collector_id: &self.cfg.collector_id,
                poll_status: "success",
                enums: self.enums.as_deref(),
                counters: self.counters.as_ref(),
            },
        );

        debug!(
            device = %decoded.device.hostname,
            object = %decoded.object_key,
            metric_count = batch.metrics.len(),
            poll_duration_ms = decoded.poll_duration_ms,
            "produce: assembled batch"
        );

        batch
    }

    /// Counter state access for retirement and purge timers. `None` when
    /// counter delta is disabled.
    pub fn counters(&self) -> Option<&CounterState> {
        self.counters.as_ref()
    }
}

/// Core assembly: pure except for the counter state behind its mutex.
///
/// Steps: partition tags from measurements grouped by instance; per
/// instance and metric name keep the highest-priority syntax; resolve
/// enums; apply counter deltas; emit one [`Metric`] per winning varbind
/// with a fresh copy of its instance's tag map.
pub fn assemble(decoded: &DecodedPollResult, opts: AssembleOptions<'_>) -> MetricBatch {
    let timestamp = if decoded.collected_at.timestamp() == 0 {
        Utc::now()
    } else {
        decoded.collected_at
    };

    let mut tags_by_instance: HashMap<&str, HashMap<String, String>> = HashMap::new();
    let mut metrics_by_instance: BTreeMap<&str, Vec<&DecodedVarbind>> = BTreeMap::new();

    for vb in &decoded.varbinds {
        if vb.is_tag {
            tags_by_instance
                .entry(&vb.instance)
                .or_default()
                .insert(vb.attribute.clone(), vb.value.tag_string());
        } else {
            metrics_by_instance.entry(&vb.instance).or_default().push(vb);
        }
    }

    let mut metrics = Vec::with_capacity(decoded.varbinds.len());

    for (instance, candidates) in metrics_by_instance {
        // Override resolution: the same output name can arrive from both an
        // object and its augmenting high-capacity variant. Highest syntax
        // priority wins; ties keep the first encountered.
        let mut by_name: BTreeMap<&str, &DecodedVarbind> = BTreeMap::new();
        for vb in candidates {
            let priority = syntax_priority(&vb.syntax);
            match by_name.get(vb.attribute.as_str()) {
                Some(existing) if priority <= syntax_priority(&existing.syntax) => {}
                _ => {
                    by_name.insert(&vb.attribute, vb);
                }
            }
        }

        let instance_tags = tags_by_instance.get(instance);

        for vb in by_name.into_values() {
            let mut value = vb.value.clone();

            if let Some(enums) = opts.enums {
                if is_enum_syntax(&vb.syntax) {
                    value = enums.resolve(base_oid(&vb.oid, instance), value);
                }
            }

            if let Some(counters) = opts.counters {
                if is_counter_syntax(&vb.syntax) {
                    if let Some(raw) = value.as_u64() {
                        let res = counters.delta(
                            CounterKey {
                                device: decoded.device.hostname.clone(),
                                attribute: vb.attribute.clone(),
                                instance: instance.to_string(),
                            },
                            raw,
                            timestamp,
                            wrap_for_syntax(&vb.syntax),
                        );
                        // First observation still emits a metric, at zero,
                        // so the series exists without a spurious spike.
                        value = MetricValue::Uint(if res.valid { res.delta } else { 0 });
                    }
                }
            }

            metrics.push(Metric {
                oid: vb.oid.clone(),
                name: vb.attribute.clone(),
                instance: instance.to_string(),
                value,
                snmp_type: vb.snmp_type.clone(),
                syntax: vb.syntax.clone(),
                tags: instance_tags.cloned().unwrap_or_default(),
            });
        }
    }

    MetricBatch {
        timestamp,
        device: decoded.device.clone(),
        metrics,
        metadata: MetricMetadata {
            collector_id: opts.collector_id.to_string(),
            poll_duration_ms: decoded.poll_duration_ms,
            poll_status: opts.poll_status.to_string(),
        },
    }
}

/// The instance suffix stripped from a full varbind OID, leaving the base
/// attribute OID the enum registry is keyed by.
fn base_oid<'a>(oid: &'a str, instance: &str) -> &'a str {
    if instance.is_empty() {
        return oid;
    }
    match oid.strip_suffix(instance) {
        Some(prefix) => prefix.strip_suffix('.').unwrap_or(oid),
        None => oid,
    }
}

/// Syntax types that pass through enum resolution. Plain integer types stay
/// numeric.
fn is_enum_syntax(syntax: &str) -> bool {
    matches!(
        syntax,
        "EnumInteger"
            | "EnumIntegerKeepID"
            | "EnumBitmap"
            | "EnumObjectIdentifier"
            | "EnumObjectIdentifierKeepOID"
    )
}

/// Sortable priority used by override resolution: when two attributes map
/// to the same output metric name for the same instance, the
/// higher-precision syntax wins.
fn syntax_priority(syntax: &str) -> i32 {
    match syntax {
        "Counter64" => 20,
        "BandwidthGBits" => 15,
        "BandwidthMBits" => 14,
        "BandwidthKBits" => 13,
        "BandwidthBits" | "Gauge32" => 11,
        "Counter32" => 10,
        _ => 0,
    }
}
