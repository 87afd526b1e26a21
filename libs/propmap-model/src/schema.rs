//! Canonical schemas, products and devices

use serde::{Deserialize, Serialize};

/// One declared property of a canonical schema
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyMetadata {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Declared value type (`float`, `int`, `enum`, ...), informational only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,
}

impl PropertyMetadata {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            value_type: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// Canonical property schema of a product or of a single device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ThingSchema {
    #[serde(default)]
    pub properties: Vec<PropertyMetadata>,
}

impl ThingSchema {
    pub fn with_properties<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            properties: ids.into_iter().map(PropertyMetadata::new).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: ThingSchema,
}

impl Product {
    pub fn new(id: impl Into<String>, metadata: ThingSchema) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            metadata,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceInstance {
    pub id: String,
    pub product_id: String,
    #[serde(default)]
    pub name: String,
    /// Device-specific schema overriding the product schema
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derive_metadata: Option<ThingSchema>,
}

impl DeviceInstance {
    pub fn new(id: impl Into<String>, product_id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            product_id: product_id.into(),
            derive_metadata: None,
        }
    }

    pub fn with_derive_metadata(mut self, schema: ThingSchema) -> Self {
        self.derive_metadata = Some(schema);
        self
    }
}
