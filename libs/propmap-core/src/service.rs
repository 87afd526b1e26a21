//! Administrative mapping operations
//!
//! Bulk save of device or product rules. A rule with an `original_id` is
//! bound (upserted under its derived key), a rule without one is unbound
//! (its derived key is deleted). Unlike the transform path, failures here
//! are returned to the caller.

use crate::error::{MappingError, Result};
use crate::resolver::MappingResolver;
use propmap_model::{MappingRule, ResolvedMappingDetail};
use propmap_store::{DeviceRegistry, RuleStore};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Outcome of a bulk save
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SaveSummary {
    pub bound: usize,
    pub unbound: usize,
}

pub struct MappingService {
    rules: Arc<dyn RuleStore>,
    registry: Arc<dyn DeviceRegistry>,
    resolver: MappingResolver,
}

#[derive(Clone, Copy)]
enum Scope<'a> {
    Product(&'a str),
    Device { product_id: &'a str, device_id: &'a str },
}

impl MappingService {
    pub fn new(rules: Arc<dyn RuleStore>, registry: Arc<dyn DeviceRegistry>) -> Self {
        let resolver = MappingResolver::new(Arc::clone(&rules), Arc::clone(&registry));
        Self {
            rules,
            registry,
            resolver,
        }
    }

    pub fn resolver(&self) -> &MappingResolver {
        &self.resolver
    }

    /// Bind or unbind rules scoped to one device
    pub async fn save_device_mapping(
        &self,
        device_id: &str,
        rules: Vec<MappingRule>,
    ) -> Result<SaveSummary> {
        let device = self
            .registry
            .find_device(device_id)
            .await?
            .ok_or_else(|| MappingError::not_found(format!("device {}", device_id)))?;

        let summary = self
            .apply(
                Scope::Device {
                    product_id: &device.product_id,
                    device_id,
                },
                rules,
            )
            .await?;
        info!(
            "Saved mapping of device {}: {} bound, {} unbound",
            device_id, summary.bound, summary.unbound
        );
        Ok(summary)
    }

    /// Bind or unbind rules shared by every device of a product
    pub async fn save_product_mapping(
        &self,
        product_id: &str,
        rules: Vec<MappingRule>,
    ) -> Result<SaveSummary> {
        self.registry
            .find_product(product_id)
            .await?
            .ok_or_else(|| MappingError::not_found(format!("product {}", product_id)))?;

        let summary = self.apply(Scope::Product(product_id), rules).await?;
        info!(
            "Saved mapping of product {}: {} bound, {} unbound",
            product_id, summary.bound, summary.unbound
        );
        Ok(summary)
    }

    pub async fn device_mapping_detail(&self, device_id: &str) -> Result<Vec<ResolvedMappingDetail>> {
        self.resolver.resolve(device_id).await
    }

    pub async fn product_mapping_detail(
        &self,
        product_id: &str,
    ) -> Result<Vec<ResolvedMappingDetail>> {
        self.resolver.resolve_for_product(product_id).await
    }

    /// Every bound rule is validated before anything is written
    async fn apply(&self, scope: Scope<'_>, rules: Vec<MappingRule>) -> Result<SaveSummary> {
        let (bind, unbind): (Vec<_>, Vec<_>) =
            rules.into_iter().partition(MappingRule::has_original_id);

        let mut to_save = Vec::with_capacity(bind.len());
        for mut rule in bind {
            scope.assign(&mut rule);
            rule.generate_id();
            rule.validate()?;
            to_save.push(rule);
        }

        let to_delete: Vec<String> = unbind
            .iter()
            .map(|rule| match scope {
                Scope::Product(product_id) => {
                    MappingRule::id_for_product(product_id, rule.metadata_type, &rule.metadata_id)
                }
                Scope::Device { device_id, .. } => {
                    MappingRule::id_for_device(device_id, rule.metadata_type, &rule.metadata_id)
                }
            })
            .collect();

        let mut summary = SaveSummary::default();
        if !to_save.is_empty() {
            summary.bound = self.rules.save(to_save).await?;
        }
        if !to_delete.is_empty() {
            summary.unbound = self.rules.delete_by_ids(&to_delete).await?;
        }
        Ok(summary)
    }
}

impl Scope<'_> {
    fn assign(&self, rule: &mut MappingRule) {
        match *self {
            Scope::Product(product_id) => {
                rule.product_id = product_id.to_string();
                rule.device_id = None;
            }
            Scope::Device {
                product_id,
                device_id,
            } => {
                rule.product_id = product_id.to_string();
                rule.device_id = Some(device_id.to_string());
            }
        }
    }
}
