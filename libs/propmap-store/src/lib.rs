//! propmap-store - persistence contracts for device property mapping
//!
//! - [`RuleStore`]: scoped query / upsert / delete of mapping rules
//! - [`DeviceRegistry`]: devices, products and their canonical schemas
//! - [`ChangeFeed`]: payload-free signal published after every rule write
//!
//! Implementations: [`InMemoryRuleStore`] and [`InMemoryRegistry`] (`DashMap`),
//! [`SqliteRuleStore`] (`sqlx`).

pub mod error;
pub mod feed;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use feed::{ChangeFeed, RuleChange, DEFAULT_FEED_CAPACITY};
pub use memory::{InMemoryRegistry, InMemoryRuleStore};
pub use sqlite::SqliteRuleStore;
pub use traits::{DeviceRegistry, RuleStore};
