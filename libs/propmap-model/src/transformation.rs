//! Value transformation config
//!
//! Rules carry their transformation inside a loosely-typed `others` blob:
//!
//! ```json
//! {"transformationConfig": {"type": "mapping", "rules": [{"source": "1s", "target": "d"}]}}
//! {"transformationConfig": {"type": "math", "expression": "(x - 32) * 5/9"}}
//! ```
//!
//! The blob is parsed once into [`Transformation`] when rules are loaded.
//! Formulas are compiled into an `evalexpr` operator tree at the same time, so
//! applying a transformation never re-reads configuration.

use crate::error::{ModelError, Result};
use evalexpr::Node;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};
use std::fmt;

/// Key of the transformation config inside a rule's `others`
pub const TRANSFORMATION_CONFIG_KEY: &str = "transformationConfig";

const TYPE_MAPPING: &str = "mapping";
const TYPE_MATH: &str = "math";

/// Parsed value transformation
#[derive(Debug, Clone, PartialEq)]
pub enum Transformation {
    /// Ordered lookup table, first matching source wins
    EnumMapping { rules: Vec<EnumRule> },
    /// Arithmetic formula over the single variable `x`
    MathExpression(Formula),
}

/// One `source -> target` entry of an enum table
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnumRule {
    pub source: String,
    pub target: Value,
}

impl EnumRule {
    pub fn new(source: impl Into<String>, target: impl Into<Value>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

impl Transformation {
    pub fn enum_mapping<I, S, T>(rules: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<Value>,
    {
        Self::EnumMapping {
            rules: rules
                .into_iter()
                .map(|(source, target)| EnumRule::new(source, target))
                .collect(),
        }
    }

    pub fn math(formula: &str) -> Self {
        Self::MathExpression(Formula::compile(formula))
    }

    /// Read `transformationConfig` out of a rule's `others` blob
    ///
    /// Returns `Ok(None)` when the key is absent or names an unknown type.
    pub fn from_others(others: &Map<String, Value>) -> Result<Option<Self>> {
        match others.get(TRANSFORMATION_CONFIG_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(config) => Self::from_config(config),
        }
    }

    /// Parse a `{"type": ..}` config object
    pub fn from_config(config: &Value) -> Result<Option<Self>> {
        let obj = config.as_object().ok_or_else(|| {
            ModelError::invalid_transformation("transformationConfig must be an object")
        })?;

        match obj.get("type").and_then(Value::as_str) {
            Some(TYPE_MAPPING) => Ok(Some(Self::EnumMapping {
                rules: parse_enum_rules(obj.get("rules"))?,
            })),
            Some(TYPE_MATH) => {
                let expression = obj
                    .get("expression")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        ModelError::invalid_transformation("math transformation needs 'expression'")
                    })?;
                Ok(Some(Self::MathExpression(Formula::compile(expression))))
            }
            _ => Ok(None),
        }
    }

    /// Serialize back into the `transformationConfig` shape
    pub fn to_config(&self) -> Value {
        match self {
            Self::EnumMapping { rules } => json!({ "type": TYPE_MAPPING, "rules": rules }),
            Self::MathExpression(formula) => {
                json!({ "type": TYPE_MATH, "expression": formula.source() })
            }
        }
    }
}

impl Serialize for Transformation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_config().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Transformation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_config(&value)
            .map_err(serde::de::Error::custom)?
            .ok_or_else(|| serde::de::Error::custom("unknown transformation type"))
    }
}

/// Accepts `[{"source": .., "target": ..}]` or `{"source": target}`
fn parse_enum_rules(rules: Option<&Value>) -> Result<Vec<EnumRule>> {
    match rules {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                let source = item
                    .get("source")
                    .and_then(scalar_to_string)
                    .ok_or_else(|| {
                        ModelError::invalid_transformation(format!(
                            "enum rule without source: {}",
                            item
                        ))
                    })?;
                let target = item.get("target").cloned().ok_or_else(|| {
                    ModelError::invalid_transformation(format!("enum rule without target: {}", item))
                })?;
                Ok(EnumRule { source, target })
            })
            .collect(),
        Some(Value::Object(table)) => Ok(table
            .iter()
            .map(|(source, target)| EnumRule::new(source.clone(), target.clone()))
            .collect()),
        _ => Err(ModelError::invalid_transformation(
            "mapping transformation needs 'rules' as a list or object",
        )),
    }
}

/// String form used to match enum sources
///
/// Strings are taken as-is, numbers and booleans use their display form.
/// `null` has no string form.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

/// A formula compiled once at load time
///
/// Numeric literals are rewritten as decimal floats before compilation so the
/// arithmetic is carried out in floating point (`5/9` is `0.555..`, not `0`).
/// Scientific notation (`1e-3`) and implicit multiplication (`2x`) are
/// accepted the same way.
/// A formula that fails to compile is kept with its error; evaluating it
/// fails, it is never rejected at load.
#[derive(Clone)]
pub struct Formula {
    source: String,
    tree: std::result::Result<Node, String>,
}

impl Formula {
    pub fn compile(source: impl Into<String>) -> Self {
        let source = source.into();
        let tree = evalexpr::build_operator_tree(&normalize_literals(&source))
            .map_err(|e| e.to_string());
        Self { source, tree }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Compiled operator tree, or the compile error
    pub fn tree(&self) -> std::result::Result<&Node, &str> {
        self.tree.as_ref().map_err(String::as_str)
    }

    pub fn is_valid(&self) -> bool {
        self.tree.is_ok()
    }
}

impl PartialEq for Formula {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl fmt::Debug for Formula {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Formula")
            .field("source", &self.source)
            .field("valid", &self.is_valid())
            .finish()
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Rewrite numeric literals into the float form the evaluator parses
///
/// - every literal becomes a plain decimal float: `5` -> `5.0`, `1e-3` -> `0.001`
/// - a literal directly followed by a name or `(` multiplies it: `2x` -> `2.0 * x`
///
/// Digits inside identifiers (`x2`, `log10`) are left alone.
fn normalize_literals(formula: &str) -> String {
    let chars: Vec<char> = formula.chars().collect();
    let digit_at = |i: usize| chars.get(i).is_some_and(char::is_ascii_digit);
    let mut out = String::with_capacity(formula.len() + 8);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let after_ident = i > 0 && is_ident_char(chars[i - 1]);
        let starts_number = !after_ident && (c.is_ascii_digit() || (c == '.' && digit_at(i + 1)));
        if !starts_number {
            out.push(c);
            i += 1;
            continue;
        }

        let start = i;
        while digit_at(i) {
            i += 1;
        }
        if chars.get(i).copied() == Some('.') {
            i += 1;
            while digit_at(i) {
                i += 1;
            }
        }
        if matches!(chars.get(i).copied(), Some('e') | Some('E')) {
            let mut j = i + 1;
            if matches!(chars.get(j).copied(), Some('+') | Some('-')) {
                j += 1;
            }
            // `2e` without exponent digits is `2 * e`
            if digit_at(j) {
                while digit_at(j) {
                    j += 1;
                }
                i = j;
            }
        }

        let literal: String = chars[start..i].iter().collect();
        match literal.parse::<f64>() {
            Ok(value) if value.is_finite() => out.push_str(&float_literal(value)),
            _ => out.push_str(&literal),
        }

        if chars
            .get(i)
            .is_some_and(|&next| next == '(' || next == '_' || next.is_alphabetic())
        {
            out.push_str(" * ");
        }
    }

    out
}

/// Decimal text of a finite float, always with a fractional part
fn float_literal(value: f64) -> String {
    let text = value.to_string();
    if text.contains('.') {
        text
    } else {
        format!("{}.0", text)
    }
}
