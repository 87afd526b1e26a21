//! Data Transformer
//!
//! Rewrites a raw property payload into the canonical schema of a device.
//! Never fails: if the device's mapping details cannot be obtained, the raw
//! payload is returned untouched.
//!
//! ## Merge
//!
//! Only custom-mapping details take part, indexed by `metadata_id`.
//!
//! 1. For every detail, `output[metadata_id]` is the transformed value of
//!    `raw[original_id]`, or `null` when that key is missing.
//! 2. For every raw `(key, value)`, look up a detail by `key`:
//!    - none, or one without a transformation: `output[key] = value`
//!    - one with a transformation: `output[metadata_id] = transform(value)`
//!
//! Step 2 keys the lookup by `metadata_id`, so a raw key only matches when it
//! equals a mapped property id. Raw keys consumed in step 1 under a different
//! name are carried through as-is.

use crate::cache::MappingCache;
use crate::resolver::MappingLoader;
use propmap_calc::TransformEngine;
use propmap_model::{DeviceMessage, PropertyMap, ResolvedMappingDetail};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error};

pub struct DataTransformer<L: MappingLoader> {
    cache: MappingCache<L>,
    engine: Arc<TransformEngine>,
}

impl<L: MappingLoader> DataTransformer<L> {
    pub fn new(cache: MappingCache<L>, engine: Arc<TransformEngine>) -> Self {
        Self { cache, engine }
    }

    pub fn cache(&self) -> &MappingCache<L> {
        &self.cache
    }

    pub fn engine(&self) -> &TransformEngine {
        &self.engine
    }

    /// Transform the properties reported by `device_id`
    pub async fn transform(&self, device_id: &str, raw: &PropertyMap) -> PropertyMap {
        match self.cache.get(device_id).await {
            Ok(details) => apply_mappings(&self.engine, raw, &details),
            Err(e) => {
                error!("Failed to transform properties of device {}: {}", device_id, e);
                raw.clone()
            }
        }
    }

    /// Transform a message's properties in place
    ///
    /// Only property reports and read-property replies are touched.
    pub async fn transform_message(&self, mut message: DeviceMessage) -> DeviceMessage {
        if !message.message_type.carries_mapped_properties() {
            return message;
        }
        message.properties = self.transform(&message.device_id, &message.properties).await;
        message
    }
}

/// Two-pass merge of `raw` with the custom mappings in `details`
pub fn apply_mappings(
    engine: &TransformEngine,
    raw: &PropertyMap,
    details: &[ResolvedMappingDetail],
) -> PropertyMap {
    let custom: HashMap<&str, &ResolvedMappingDetail> = details
        .iter()
        .filter(|d| d.is_custom_mapping())
        .map(|d| (d.metadata_id.as_str(), d))
        .collect();

    if custom.is_empty() {
        return raw.clone();
    }

    let mut output = PropertyMap::with_capacity(raw.len() + custom.len());

    for (metadata_id, detail) in &custom {
        let source = detail
            .original_id
            .as_deref()
            .and_then(|original_id| raw.get(original_id))
            .filter(|value| !value.is_null());

        let value = match (source, &detail.transformation) {
            (Some(value), Some(transformation)) => engine.apply(value, transformation),
            (Some(value), None) => value.clone(),
            (None, _) => Value::Null,
        };
        output.insert((*metadata_id).to_string(), value);
    }

    for (key, value) in raw {
        match custom.get(key.as_str()) {
            Some(detail) => match &detail.transformation {
                Some(transformation) => {
                    output.insert(detail.metadata_id.clone(), engine.apply(value, transformation));
                }
                None => {
                    output.insert(key.clone(), value.clone());
                }
            },
            None => {
                output.insert(key.clone(), value.clone());
            }
        }
    }

    debug!(
        "Mapped {} raw properties into {} with {} custom mappings",
        raw.len(),
        output.len(),
        custom.len()
    );
    output
}
