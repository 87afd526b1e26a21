//! In-memory stores backed by `DashMap`

use crate::error::Result;
use crate::feed::{ChangeFeed, RuleChange};
use crate::traits::{DeviceRegistry, RuleStore};
use async_trait::async_trait;
use dashmap::DashMap;
use propmap_model::{DeviceInstance, MappingRule, Product};

/// Rule store keeping rules by derived id
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    rules: DashMap<String, MappingRule>,
    feed: ChangeFeed,
}

impl InMemoryRuleStore {
    pub fn new(feed: ChangeFeed) -> Self {
        Self {
            rules: DashMap::new(),
            feed,
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<MappingRule> {
        self.rules.get(id).map(|r| r.value().clone())
    }
}

fn in_scope(rule: &MappingRule, product_id: &str, device_id: Option<&str>) -> bool {
    if rule.product_id != product_id {
        return false;
    }
    if !rule.is_device_scoped() {
        return true;
    }
    device_id.is_some_and(|d| rule.device_id.as_deref() == Some(d))
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn query(&self, product_id: &str, device_id: Option<&str>) -> Result<Vec<MappingRule>> {
        let mut rules: Vec<MappingRule> = self
            .rules
            .iter()
            .filter(|entry| in_scope(entry.value(), product_id, device_id))
            .map(|entry| entry.value().clone())
            .collect();
        rules.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(rules)
    }

    async fn save(&self, rules: Vec<MappingRule>) -> Result<usize> {
        let mut created = false;
        let count = rules.len();
        for mut rule in rules {
            let id = rule.generate_id().to_string();
            created |= self.rules.insert(id, rule).is_none();
        }
        if count > 0 {
            self.feed.publish(if created {
                RuleChange::Created
            } else {
                RuleChange::Modified
            });
        }
        Ok(count)
    }

    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize> {
        let removed = ids
            .iter()
            .filter(|id| self.rules.remove(id.as_str()).is_some())
            .count();
        if removed > 0 {
            self.feed.publish(RuleChange::Deleted);
        }
        Ok(removed)
    }

    async fn delete_by_scope(&self, product_id: &str, device_id: Option<&str>) -> Result<usize> {
        let before = self.rules.len();
        self.rules.retain(|_, rule| {
            let same_scope = rule.product_id == product_id
                && match device_id {
                    Some(d) => rule.device_id.as_deref() == Some(d),
                    None => !rule.is_device_scoped(),
                };
            !same_scope
        });
        let removed = before - self.rules.len();
        if removed > 0 {
            self.feed.publish(RuleChange::Deleted);
        }
        Ok(removed)
    }
}

/// Device and product registry
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    devices: DashMap<String, DeviceInstance>,
    products: DashMap<String, Product>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_product(&self, product: Product) {
        self.products.insert(product.id.clone(), product);
    }

    pub fn insert_device(&self, device: DeviceInstance) {
        self.devices.insert(device.id.clone(), device);
    }

    pub fn remove_device(&self, device_id: &str) -> Option<DeviceInstance> {
        self.devices.remove(device_id).map(|(_, d)| d)
    }
}

#[async_trait]
impl DeviceRegistry for InMemoryRegistry {
    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceInstance>> {
        Ok(self.devices.get(device_id).map(|d| d.value().clone()))
    }

    async fn find_product(&self, product_id: &str) -> Result<Option<Product>> {
        Ok(self.products.get(product_id).map(|p| p.value().clone()))
    }
}
