//! Poll-response decoding: raw varbinds → attribute-resolved native values.
//!
//! The decoder is the first pipeline stage after the poller. For every raw
//! varbind it matches the OID against the object definition's attributes,
//! extracts the table-row instance suffix, and converts the value to its
//! native form according to the configured syntax. Grouping, enum text
//! resolution, and counter deltas are deliberately left to the producer.

mod convert;

use std::collections::HashMap;
use std::sync::Arc;

use async_snmp::{Oid, VarBind};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

pub use convert::{convert_value, fallback_convert, is_error_value, pdu_type_string};

use crate::config::{AttributeDefinition, ObjectDefinition};
use crate::error::Error;
use crate::model::{Device, MetricValue};

/// Message placed on the raw channel by the poller after an SNMP request.
#[derive(Debug, Clone)]
pub struct RawPollResult {
    pub device: Device,
    /// The definition that drove this poll; maps raw OIDs back to attribute
    /// names and syntax.
    pub object: Arc<ObjectDefinition>,
    /// Raw variable bindings exactly as returned by the session.
    pub varbinds: Vec<VarBind>,
    /// Wall-clock time the request was sent.
    pub poll_started_at: DateTime<Utc>,
    /// Wall-clock time the response was received.
    pub collected_at: DateTime<Utc>,
}

/// A single decoded variable binding.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedVarbind {
    /// Full numeric OID, normalized without a leading dot.
    pub oid: String,
    /// Resolved attribute name, e.g. "netif.bytes.in".
    pub attribute: String,
    /// Table row index suffix extracted from the OID, e.g. "1" or
    /// "192.168.1.1.5" for a compound index. "0" for direct scalar matches.
    pub instance: String,
    pub value: MetricValue,
    /// SNMP PDU type string, e.g. "Counter64".
    pub snmp_type: String,
    /// Config syntax verbatim, e.g. "BandwidthMBits".
    pub syntax: String,
    pub is_tag: bool,
}

/// Message placed on the decoded channel, consumed by the producer.
///
/// Varbinds are a flat list with tags and measurements interleaved; the
/// producer groups them by instance.
#[derive(Debug, Clone)]
pub struct DecodedPollResult {
    pub device: Device,
    /// Which object definition produced this result, e.g. "IF-MIB::ifEntry".
    pub object_key: String,
    pub varbinds: Vec<DecodedVarbind>,
    pub collected_at: DateTime<Utc>,
    pub poll_duration_ms: i64,
}

/// A decode failure carrying everything that was decoded before the error.
///
/// Conversion failures on one PDU must not throw away its siblings; the
/// caller decides whether to forward the partial result.
#[derive(Debug)]
pub struct PartialDecode {
    pub partial: DecodedPollResult,
    pub error: Error,
}

/// Converts [`RawPollResult`]s into [`DecodedPollResult`]s. Stateless and
/// safe for concurrent use from every decoder worker.
#[derive(Debug, Default)]
pub struct Decoder;

impl Decoder {
    pub fn new() -> Self {
        Self
    }

    /// Decodes every raw varbind of `raw`.
    ///
    /// On a conversion failure the varbinds decoded so far are returned
    /// inside [`PartialDecode`] together with the specific error.
    pub fn decode(&self, raw: &RawPollResult) -> Result<DecodedPollResult, PartialDecode> {
        let mut result = DecodedPollResult {
            device: raw.device.clone(),
            object_key: raw.object.key.clone(),
            varbinds: Vec::new(),
            collected_at: raw.collected_at,
            poll_duration_ms: (raw.collected_at - raw.poll_started_at).num_milliseconds(),
        };

        if raw.varbinds.is_empty() {
            warn!(
                device = %raw.device.hostname,
                object = %raw.object.key,
                "decode: empty varbind list"
            );
            return Ok(result);
        }

        let index = match AttributeIndex::build(&raw.object) {
            Ok(index) => index,
            Err(error) => {
                return Err(PartialDecode {
                    partial: result,
                    error,
                });
            }
        };

        for vb in &raw.varbinds {
            // Exception sentinels carry no data.
            if is_error_value(&vb.value) {
                continue;
            }

            let Some((attr, instance)) = index.match_attribute(&vb.oid) else {
                // Outside the polled sub-tree; normal for bulk walks.
                continue;
            };

            let value = match convert_value(&vb.value, &attr.syntax) {
                Ok(value) => value,
                Err(kind) => {
                    return Err(PartialDecode {
                        error: Error::Conversion {
                            oid: vb.oid.to_string(),
                            attribute: attr.name.clone(),
                            syntax: attr.syntax.clone(),
                            kind,
                        },
                        partial: result,
                    });
                }
            };

            result.varbinds.push(DecodedVarbind {
                oid: vb.oid.to_string(),
                attribute: attr.name.clone(),
                instance,
                value,
                snmp_type: pdu_type_string(&vb.value),
                syntax: attr.syntax.clone(),
                is_tag: attr.is_tag,
            });
        }

        if result.varbinds.is_empty() {
            warn!(
                device = %raw.device.hostname,
                object = %raw.object.key,
                pdu_count = raw.varbinds.len(),
                "decode: no attributes matched; PDUs may be outside the configured object tree"
            );
        }

        debug!(
            device = %raw.device.hostname,
            object = %raw.object.key,
            pdu_count = raw.varbinds.len(),
            decoded_count = result.varbinds.len(),
            poll_duration_ms = result.poll_duration_ms,
            "decode: completed"
        );

        Ok(result)
    }
}

/// Pre-computed OID → attribute lookup for one object definition, so that
/// matching each varbind is O(depth) at worst.
struct AttributeIndex<'a> {
    by_oid: HashMap<Oid, &'a AttributeDefinition>,
}

impl<'a> AttributeIndex<'a> {
    fn build(object: &'a ObjectDefinition) -> Result<Self, Error> {
        if object.attributes.is_empty() {
            return Err(Error::NoAttributes {
                object: object.key.clone(),
            });
        }

        let mut by_oid = HashMap::with_capacity(object.attributes.len());
        for attr in object.attributes.values() {
            let oid = Oid::parse(&attr.oid).map_err(|_| {
                Error::Config(format!(
                    "attribute {:?} in object {:?} has an invalid OID {:?}",
                    attr.name, object.key, attr.oid
                ))
            })?;
            if oid.is_empty() {
                return Err(Error::Config(format!(
                    "attribute {:?} in object {:?} has an empty OID",
                    attr.name, object.key
                )));
            }
            by_oid.insert(oid, attr);
        }
        Ok(Self { by_oid })
    }

    /// Longest-prefix match of a varbind OID against the attribute table.
    ///
    /// A direct hit means a scalar OID that includes its ".0"; the instance
    /// is returned as "0". Otherwise arcs are stripped from the right until
    /// a known attribute OID remains, and the stripped suffix is the table
    /// instance (possibly compound).
    fn match_attribute(&self, full: &Oid) -> Option<(&'a AttributeDefinition, String)> {
        if let Some(attr) = self.by_oid.get(full) {
            return Some((attr, "0".to_string()));
        }

        let mut prefix = full.parent()?;
        loop {
            if let Some(attr) = self.by_oid.get(&prefix) {
                let suffix = full.arcs()[prefix.len()..]
                    .iter()
                    .map(u32::to_string)
                    .collect::<Vec<_>>()
                    .join(".");
                return Some((attr, suffix));
            }
            prefix = prefix.parent()?;
        }
    }
}
