//! propmap-calc - value transformation for device property mapping
//!
//! Applies a parsed [`propmap_model::Transformation`] to one raw property value.
//!
//! | Kind | Config | Behavior |
//! |------|--------|----------|
//! | Enum mapping | `{"type":"mapping","rules":[{"source":..,"target":..}]}` | first matching source wins, miss passes through |
//! | Math expression | `{"type":"math","expression":"(x - 32) * 5/9"}` | `x` bound to the numeric raw value |
//!
//! Failures never propagate out of [`TransformEngine::apply`]: the raw value
//! is returned and the failure is logged and counted.
//!
//! # Example
//!
//! ```rust
//! use propmap_calc::TransformEngine;
//! use propmap_model::Transformation;
//! use serde_json::json;
//!
//! let engine = TransformEngine::new();
//! let table = Transformation::enum_mapping([("1s", "d"), ("4", "5")]);
//! assert_eq!(engine.apply(&json!("1s"), &table), json!("d"));
//! assert_eq!(engine.apply(&json!("zzz"), &table), json!("zzz"));
//!
//! let broken = Transformation::math("(x *");
//! assert_eq!(engine.apply(&json!(7), &broken), json!(7));
//! ```

pub mod engine;
pub mod error;
pub mod evaluator;

pub use engine::TransformEngine;
pub use error::{CalcError, Result};
pub use evaluator::{evaluate_formula, to_number, FORMULA_VARIABLE};
