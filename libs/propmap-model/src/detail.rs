//! Resolved mapping details
//!
//! One [`ResolvedMappingDetail`] exists per canonical property of a device's
//! effective schema. It records which raw key (if any) feeds the property and
//! how the value is transformed on the way.

use crate::rule::{MappingRule, MetadataType};
use crate::schema::PropertyMetadata;
use crate::transformation::Transformation;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedMappingDetail {
    pub product_id: String,
    /// `None` for product-level details
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub metadata_type: MetadataType,
    pub metadata_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata_name: Option<String>,
    pub original_id: Option<String>,
    pub transformation: Option<Transformation>,
    /// True iff `original_id` is set
    pub custom_mapping: bool,
}

impl ResolvedMappingDetail {
    pub fn of_product(product_id: impl Into<String>) -> Self {
        Self {
            product_id: product_id.into(),
            device_id: None,
            metadata_type: MetadataType::Property,
            metadata_id: String::new(),
            metadata_name: None,
            original_id: None,
            transformation: None,
            custom_mapping: false,
        }
    }

    pub fn of_device(product_id: impl Into<String>, device_id: impl Into<String>) -> Self {
        Self {
            device_id: Some(device_id.into()),
            ..Self::of_product(product_id)
        }
    }

    pub fn with_property(mut self, property: &PropertyMetadata) -> Self {
        self.metadata_type = MetadataType::Property;
        self.metadata_id = property.id.clone();
        self.metadata_name = property.name.clone();
        self
    }

    /// Attach the winning rule and its already-parsed transformation
    pub fn with_rule(
        mut self,
        rule: Option<&MappingRule>,
        transformation: Option<Transformation>,
    ) -> Self {
        match rule {
            Some(rule) if rule.has_original_id() => {
                self.original_id = rule.original_id.clone();
                self.transformation = transformation;
                self.custom_mapping = true;
            }
            _ => {
                self.original_id = None;
                self.transformation = None;
                self.custom_mapping = false;
            }
        }
        self
    }

    pub fn is_custom_mapping(&self) -> bool {
        self.custom_mapping
    }
}
