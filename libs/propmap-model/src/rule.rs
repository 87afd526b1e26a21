//! Mapping rule records
//!
//! A rule binds one canonical metadata property of a product (or of a single
//! device of that product) to a raw property key reported by the device.
//!
//! ## Identity
//!
//! The storage key is derived from the rule scope, never assigned:
//! `"{device_id or product_id}:{metadata_type}:{metadata_id}"`.
//! Saving the same rule twice replaces it; unbinding only needs the scope and
//! the metadata identifiers.

use crate::error::{ModelError, Result};
use crate::transformation::{Transformation, TRANSFORMATION_CONFIG_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Kind of canonical metadata a rule targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataType {
    #[default]
    Property,
    Event,
    Function,
    Tag,
}

impl MetadataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Property => "property",
            Self::Event => "event",
            Self::Function => "function",
            Self::Tag => "tag",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "property" => Some(Self::Property),
            "event" => Some(Self::Event),
            "function" => Some(Self::Function),
            "tag" => Some(Self::Tag),
            _ => None,
        }
    }
}

impl fmt::Display for MetadataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted mapping rule
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MappingRule {
    /// Derived storage key, filled by [`MappingRule::generate_id`]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub product_id: String,
    /// `None` for product-scoped rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default)]
    pub metadata_type: MetadataType,
    pub metadata_id: String,
    /// Raw property key the value is sourced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_id: Option<String>,
    /// Loosely-typed extras; `transformationConfig` lives here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub others: Option<Map<String, Value>>,
}

impl MappingRule {
    /// Product-scoped rule
    pub fn for_product(
        product_id: impl Into<String>,
        metadata_id: impl Into<String>,
        original_id: impl Into<String>,
    ) -> Self {
        Self {
            product_id: product_id.into(),
            metadata_id: metadata_id.into(),
            original_id: Some(original_id.into()),
            ..Default::default()
        }
    }

    /// Device-scoped rule
    pub fn for_device(
        product_id: impl Into<String>,
        device_id: impl Into<String>,
        metadata_id: impl Into<String>,
        original_id: impl Into<String>,
    ) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::for_product(product_id, metadata_id, original_id)
        }
    }

    /// Attach a transformation, stored in the `others` blob
    pub fn with_transformation(mut self, transformation: &Transformation) -> Self {
        self.others
            .get_or_insert_with(Map::new)
            .insert(TRANSFORMATION_CONFIG_KEY.to_string(), transformation.to_config());
        self
    }

    pub fn is_device_scoped(&self) -> bool {
        self.device_id.as_deref().is_some_and(|d| !d.is_empty())
    }

    /// True when the rule sources its value from a raw key
    pub fn has_original_id(&self) -> bool {
        self.original_id
            .as_deref()
            .is_some_and(|o| !o.trim().is_empty())
    }

    /// Scope id used in the storage key: device id if set, else product id
    pub fn scope_id(&self) -> &str {
        match self.device_id.as_deref() {
            Some(device_id) if !device_id.is_empty() => device_id,
            _ => &self.product_id,
        }
    }

    /// Fill and return the derived storage key
    pub fn generate_id(&mut self) -> &str {
        let id = derive_id(self.scope_id(), self.metadata_type, &self.metadata_id);
        self.id.insert(id)
    }

    pub fn id_for_device(device_id: &str, metadata_type: MetadataType, metadata_id: &str) -> String {
        derive_id(device_id, metadata_type, metadata_id)
    }

    pub fn id_for_product(product_id: &str, metadata_type: MetadataType, metadata_id: &str) -> String {
        derive_id(product_id, metadata_type, metadata_id)
    }

    /// Parse the transformation carried in `others`, if any
    pub fn transformation(&self) -> Result<Option<Transformation>> {
        match &self.others {
            Some(others) => Transformation::from_others(others),
            None => Ok(None),
        }
    }

    /// Checks required before a rule may be bound
    pub fn validate(&self) -> Result<()> {
        if self.product_id.trim().is_empty() {
            return Err(ModelError::validation("product_id must not be empty"));
        }
        if self.metadata_id.trim().is_empty() {
            return Err(ModelError::validation("metadata_id must not be empty"));
        }
        if !self.has_original_id() {
            return Err(ModelError::validation(format!(
                "original_id must not be empty for {}",
                self.metadata_id
            )));
        }
        Ok(())
    }
}

fn derive_id(scope: &str, metadata_type: MetadataType, metadata_id: &str) -> String {
    format!("{}:{}:{}", scope, metadata_type.as_str(), metadata_id)
}
