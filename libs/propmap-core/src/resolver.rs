//! Mapping Resolver
//!
//! Builds the resolved mapping details of a device (or a product) from its
//! canonical schema and the rules in scope.
//!
//! ## Precedence
//!
//! Rules are reduced to one per `metadata_id`. When a product-scoped and a
//! device-scoped rule target the same property, the device-scoped rule wins
//! regardless of the order the store returned them in.

use crate::error::{MappingError, Result};
use async_trait::async_trait;
use propmap_model::{MappingRule, ResolvedMappingDetail, ThingSchema, Transformation};
use propmap_store::{DeviceRegistry, RuleStore};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Source of resolved details for the mapping cache
#[async_trait]
pub trait MappingLoader: Send + Sync + 'static {
    async fn load(&self, device_id: &str) -> Result<Vec<ResolvedMappingDetail>>;
}

#[derive(Clone)]
pub struct MappingResolver {
    rules: Arc<dyn RuleStore>,
    registry: Arc<dyn DeviceRegistry>,
}

impl MappingResolver {
    pub fn new(rules: Arc<dyn RuleStore>, registry: Arc<dyn DeviceRegistry>) -> Self {
        Self { rules, registry }
    }

    /// Resolve the details of one device
    ///
    /// Uses the device's own schema when it has one, else its product's.
    /// Fails with `NotFound` when the device, product or schema is missing.
    pub async fn resolve(&self, device_id: &str) -> Result<Vec<ResolvedMappingDetail>> {
        let device = self
            .registry
            .find_device(device_id)
            .await?
            .ok_or_else(|| MappingError::not_found(format!("device {}", device_id)))?;

        let schema = match self.registry.device_schema_override(device_id).await? {
            Some(schema) => schema,
            None => self.registry.product_schema(&device.product_id).await?,
        };

        let rules = self.rules.query(&device.product_id, Some(device_id)).await?;
        debug!(
            "Resolving device {} with {} rules over {} properties",
            device_id,
            rules.len(),
            schema.properties.len()
        );

        Ok(build_details(&schema, reduce_rules(rules), || {
            ResolvedMappingDetail::of_device(device.product_id.as_str(), device_id)
        }))
    }

    /// Resolve the product-level details, ignoring device-scoped rules
    pub async fn resolve_for_product(&self, product_id: &str) -> Result<Vec<ResolvedMappingDetail>> {
        let schema = self.registry.product_schema(product_id).await?;
        let rules = self.rules.query(product_id, None).await?;

        Ok(build_details(&schema, reduce_rules(rules), || {
            ResolvedMappingDetail::of_product(product_id)
        }))
    }
}

#[async_trait]
impl MappingLoader for MappingResolver {
    async fn load(&self, device_id: &str) -> Result<Vec<ResolvedMappingDetail>> {
        self.resolve(device_id).await
    }
}

/// Keep one rule per `metadata_id`, device-scoped over product-scoped
pub fn reduce_rules(rules: Vec<MappingRule>) -> HashMap<String, MappingRule> {
    let mut by_metadata: HashMap<String, MappingRule> = HashMap::with_capacity(rules.len());
    for rule in rules {
        match by_metadata.entry(rule.metadata_id.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(rule);
            }
            Entry::Occupied(mut slot) => {
                if rule.is_device_scoped() && !slot.get().is_device_scoped() {
                    slot.insert(rule);
                }
            }
        }
    }
    by_metadata
}

fn build_details<F>(
    schema: &ThingSchema,
    rules: HashMap<String, MappingRule>,
    builder: F,
) -> Vec<ResolvedMappingDetail>
where
    F: Fn() -> ResolvedMappingDetail,
{
    schema
        .properties
        .iter()
        .map(|property| {
            let rule = rules.get(&property.id);
            let transformation = rule.and_then(parse_transformation);
            builder().with_property(property).with_rule(rule, transformation)
        })
        .collect()
}

/// A rule whose transformation config is malformed maps without transforming
fn parse_transformation(rule: &MappingRule) -> Option<Transformation> {
    match rule.transformation() {
        Ok(transformation) => transformation,
        Err(e) => {
            warn!(
                "Ignoring transformation of rule {}: {}",
                rule.id.as_deref().unwrap_or(&rule.metadata_id),
                e
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use propmap_model::{DeviceInstance, Product, PropertyMetadata};
    use propmap_store::{ChangeFeed, InMemoryRegistry, InMemoryRuleStore};
    use serde_json::json;
    use tracing_test::traced_test;

    fn permutations(rules: &[MappingRule]) -> Vec<Vec<MappingRule>> {
        if rules.len() <= 1 {
            return vec![rules.to_vec()];
        }
        let mut out = Vec::new();
        for i in 0..rules.len() {
            let mut rest = rules.to_vec();
            let head = rest.remove(i);
            for mut tail in permutations(&rest) {
                tail.insert(0, head.clone());
                out.push(tail);
            }
        }
        out
    }

    #[test]
    fn test_device_rule_wins_in_every_order() {
        let rules = vec![
            MappingRule::for_product("p1", "temp", "product_t"),
            MappingRule::for_device("p1", "d1", "temp", "device_t"),
            MappingRule::for_product("p1", "hum", "product_h"),
        ];

        for ordering in permutations(&rules) {
            let reduced = reduce_rules(ordering);
            assert_eq!(reduced.len(), 2);
            assert_eq!(reduced["temp"].original_id.as_deref(), Some("device_t"));
            assert_eq!(reduced["hum"].original_id.as_deref(), Some("product_h"));
        }
    }

    async fn fixture() -> (MappingResolver, Arc<InMemoryRuleStore>, Arc<InMemoryRegistry>) {
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert_product(Product::new(
            "thermostat",
            ThingSchema::with_properties(["temperature", "humidity", "mode"]),
        ));
        registry.insert_device(DeviceInstance::new("dev-1", "thermostat"));

        let store = Arc::new(InMemoryRuleStore::new(ChangeFeed::default()));
        let resolver = MappingResolver::new(store.clone(), registry.clone());
        (resolver, store, registry)
    }

    #[tokio::test]
    async fn test_resolve_attaches_rules_to_schema() {
        let (resolver, store, _) = fixture().await;
        store
            .save(vec![
                MappingRule::for_product("thermostat", "temperature", "temp_f")
                    .with_transformation(&Transformation::math("(x - 32) * 5/9")),
                MappingRule::for_device("thermostat", "dev-1", "humidity", "rh"),
                MappingRule::for_device("thermostat", "dev-2", "mode", "m"),
            ])
            .await
            .unwrap();

        let details = resolver.resolve("dev-1").await.unwrap();
        assert_eq!(details.len(), 3);
        assert!(details.iter().all(|d| d.device_id.as_deref() == Some("dev-1")));

        let temperature = &details[0];
        assert_eq!(temperature.metadata_id, "temperature");
        assert_eq!(temperature.original_id.as_deref(), Some("temp_f"));
        assert!(temperature.transformation.is_some());

        assert_eq!(details[1].original_id.as_deref(), Some("rh"));

        // dev-2's rule is out of scope
        assert!(!details[2].is_custom_mapping());
    }

    #[tokio::test]
    async fn test_resolve_uses_device_schema_override() {
        let (resolver, _, registry) = fixture().await;
        registry.insert_device(
            DeviceInstance::new("dev-9", "thermostat").with_derive_metadata(ThingSchema {
                properties: vec![PropertyMetadata::new("pressure").with_name("Pressure")],
            }),
        );

        let details = resolver.resolve("dev-9").await.unwrap();
        assert_eq!(details.len(), 1);
        assert_eq!(details[0].metadata_id, "pressure");
        assert_eq!(details[0].metadata_name.as_deref(), Some("Pressure"));
    }

    #[tokio::test]
    async fn test_resolve_missing_device_or_product() {
        let (resolver, _, registry) = fixture().await;
        assert!(resolver.resolve("ghost").await.unwrap_err().is_not_found());

        registry.insert_device(DeviceInstance::new("orphan", "no-such-product"));
        assert!(resolver.resolve("orphan").await.unwrap_err().is_not_found());
        assert!(resolver
            .resolve_for_product("no-such-product")
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn test_resolve_for_product_ignores_device_rules() {
        let (resolver, store, _) = fixture().await;
        store
            .save(vec![
                MappingRule::for_product("thermostat", "temperature", "temp_f"),
                MappingRule::for_device("thermostat", "dev-1", "temperature", "t"),
            ])
            .await
            .unwrap();

        let details = resolver.resolve_for_product("thermostat").await.unwrap();
        assert!(details.iter().all(|d| d.device_id.is_none()));
        assert_eq!(details[0].original_id.as_deref(), Some("temp_f"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_transformation_maps_without_transform() {
        let (resolver, store, _) = fixture().await;
        let mut rule = MappingRule::for_product("thermostat", "mode", "m");
        rule.others = json!({ "transformationConfig": { "type": "mapping" } })
            .as_object()
            .cloned();
        store.save(vec![rule]).await.unwrap();

        let details = resolver.resolve("dev-1").await.unwrap();
        let mode = details.iter().find(|d| d.metadata_id == "mode").unwrap();
        assert!(mode.is_custom_mapping());
        assert!(mode.transformation.is_none());
        assert!(logs_contain("Ignoring transformation of rule"));
    }
}
