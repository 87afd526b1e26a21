//! TransformEngine - applies a parsed transformation to one raw value
//!
//! `apply` is total: enum misses pass the value through, and any formula
//! failure (compile, non-numeric input, evaluation) is logged, counted and
//! answered with the raw value.

use crate::error::{CalcError, Result};
use crate::evaluator::{evaluate_formula, to_number};
use propmap_model::{scalar_to_string, EnumRule, Transformation};
use serde_json::{Number, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

#[derive(Debug, Default)]
pub struct TransformEngine {
    failures: AtomicU64,
}

impl TransformEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transform `raw`, falling back to `raw` on any failure
    pub fn apply(&self, raw: &Value, transformation: &Transformation) -> Value {
        match self.try_apply(raw, transformation) {
            Ok(value) => value,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Transformation failed for value {}: {}", raw, e);
                raw.clone()
            }
        }
    }

    /// Transform `raw`, reporting formula failures
    ///
    /// `null` is returned unchanged by both kinds.
    pub fn try_apply(&self, raw: &Value, transformation: &Transformation) -> Result<Value> {
        if raw.is_null() {
            return Ok(Value::Null);
        }

        match transformation {
            Transformation::EnumMapping { rules } => Ok(lookup_enum(raw, rules)),
            Transformation::MathExpression(formula) => {
                let x = to_number(raw)?;
                let result = evaluate_formula(formula, x)?;
                Number::from_f64(result)
                    .map(Value::Number)
                    .ok_or_else(|| CalcError::NonFinite(result.to_string()))
            }
        }
    }

    /// Number of failed transformations since construction
    pub fn failure_count(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

/// First rule whose source equals the value's string form wins
fn lookup_enum(raw: &Value, rules: &[EnumRule]) -> Value {
    let Some(key) = scalar_to_string(raw) else {
        return raw.clone();
    };
    rules
        .iter()
        .find(|rule| rule.source == key)
        .map(|rule| rule.target.clone())
        .unwrap_or_else(|| raw.clone())
}
