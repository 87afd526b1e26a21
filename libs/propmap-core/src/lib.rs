//! Propmap Core
//!
//! Maps the raw properties a device reports onto the canonical properties of
//! its product, applying per-property value transformations on the way.
//!
//! | Component | Role |
//! |-----------|------|
//! | [`MappingResolver`] | schema + scoped rules -> resolved details, device rules over product rules |
//! | [`MappingCache`] | single-flight, bounded, globally invalidated cache of resolved details |
//! | [`DataTransformer`] | two-pass merge of a raw payload, fail-open |
//! | [`MessageWriter`] | transform then hand off to a [`DeviceDataSink`] |
//! | [`MappingService`] | bulk bind / unbind of device and product rules |
//!
//! # Example
//!
//! ```rust,no_run
//! use propmap_calc::TransformEngine;
//! use propmap_core::{CacheConfig, DataTransformer, MappingCache, MappingResolver};
//! use propmap_store::{ChangeFeed, InMemoryRegistry, InMemoryRuleStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> propmap_core::Result<()> {
//! let feed = ChangeFeed::default();
//! let rules = Arc::new(InMemoryRuleStore::new(feed.clone()));
//! let registry = Arc::new(InMemoryRegistry::new());
//!
//! let cache = MappingCache::new(MappingResolver::new(rules, registry), CacheConfig::default());
//! cache.spawn_invalidation_listener(feed.subscribe());
//!
//! let transformer = DataTransformer::new(cache, Arc::new(TransformEngine::new()));
//! let raw = Default::default();
//! let mapped = transformer.transform("dev-1", &raw).await;
//! # let _ = mapped;
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod logging;
pub mod resolver;
pub mod service;
pub mod transformer;
pub mod writer;

pub use cache::{CacheStats, MappingCache, MappingSet};
pub use config::{load_config, CacheConfig, PropmapConfig, StoreConfig};
pub use error::{MappingError, Result};
pub use logging::{init_logging, LoggingConfig};
pub use resolver::{reduce_rules, MappingLoader, MappingResolver};
pub use service::{MappingService, SaveSummary};
pub use transformer::{apply_mappings, DataTransformer};
pub use writer::{DeviceDataSink, MessageWriter};
