//! Propmap Model Library
//!
//! Data model for device property mapping: mapping rules and their derived
//! identity, canonical schemas, parsed value transformations, resolved
//! mapping details and device messages.
//!
//! This crate holds no I/O. Stores live in `propmap-store`, resolution and
//! caching in `propmap-core`.
//!
//! # Example
//!
//! ```
//! use propmap_model::{MappingRule, Transformation};
//!
//! let mut rule = MappingRule::for_device("thermostat", "dev-1", "temperature", "temp_f")
//!     .with_transformation(&Transformation::math("(x - 32) * 5/9"));
//! assert_eq!(rule.generate_id(), "dev-1:property:temperature");
//! assert!(rule.transformation().unwrap().is_some());
//! ```

pub mod detail;
pub mod error;
pub mod message;
pub mod rule;
pub mod schema;
pub mod transformation;

pub use detail::ResolvedMappingDetail;
pub use error::{ModelError, Result};
pub use message::{DeviceMessage, MessageType, PropertyMap};
pub use rule::{MappingRule, MetadataType};
pub use schema::{DeviceInstance, Product, PropertyMetadata, ThingSchema};
pub use transformation::{
    scalar_to_string, EnumRule, Formula, Transformation, TRANSFORMATION_CONFIG_KEY,
};
