//! Store contracts consumed by the mapping resolver

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use propmap_model::{DeviceInstance, MappingRule, Product, ThingSchema};

/// Persistence of mapping rules
///
/// Rules are keyed by their derived id, so `save` replaces and
/// `delete_by_ids` removes by `(scope, metadata_type, metadata_id)`.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// Rules of `product_id` that are product-scoped, plus, when `device_id`
    /// is given, the rules scoped to that device
    async fn query(&self, product_id: &str, device_id: Option<&str>) -> Result<Vec<MappingRule>>;

    /// Upsert rules, deriving ids where missing; returns the number written
    async fn save(&self, rules: Vec<MappingRule>) -> Result<usize>;

    /// Delete rules by derived id; returns the number removed
    async fn delete_by_ids(&self, ids: &[String]) -> Result<usize>;

    /// Delete every rule of one scope: the product-scoped rules of
    /// `product_id` when `device_id` is `None`, else that device's rules
    async fn delete_by_scope(&self, product_id: &str, device_id: Option<&str>) -> Result<usize>;
}

/// Lookup of devices, products and their canonical schemas
#[async_trait]
pub trait DeviceRegistry: Send + Sync {
    async fn find_device(&self, device_id: &str) -> Result<Option<DeviceInstance>>;

    async fn find_product(&self, product_id: &str) -> Result<Option<Product>>;

    async fn product_schema(&self, product_id: &str) -> Result<ThingSchema> {
        self.find_product(product_id)
            .await?
            .map(|product| product.metadata)
            .ok_or_else(|| StoreError::product_not_found(product_id))
    }

    /// Device-specific schema, `None` when the device uses its product's
    async fn device_schema_override(&self, device_id: &str) -> Result<Option<ThingSchema>> {
        self.find_device(device_id)
            .await?
            .map(|device| device.derive_metadata)
            .ok_or_else(|| StoreError::device_not_found(device_id))
    }
}
