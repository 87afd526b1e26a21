//! Formula evaluation over the single variable `x`
//!
//! Besides `x`, formulas see the constants `pi` and `e` and the usual
//! single-argument math functions (`sqrt`, `abs`, `log`, `log10`, `sin`, ...).
//! `log` is the natural logarithm.

use crate::error::{CalcError, Result};
use evalexpr::{
    ContextWithMutableFunctions, ContextWithMutableVariables, EvalexprError, Function,
    HashMapContext, Value as ExprValue,
};
use propmap_model::Formula;
use serde_json::Value;

/// Name of the free variable bound to the raw value
pub const FORMULA_VARIABLE: &str = "x";

const CONSTANTS: &[(&str, f64)] = &[("pi", std::f64::consts::PI), ("e", std::f64::consts::E)];

const UNARY_FUNCTIONS: &[(&str, fn(f64) -> f64)] = &[
    ("abs", f64::abs),
    ("acos", f64::acos),
    ("asin", f64::asin),
    ("atan", f64::atan),
    ("cbrt", f64::cbrt),
    ("ceil", f64::ceil),
    ("cos", f64::cos),
    ("cosh", f64::cosh),
    ("exp", f64::exp),
    ("expm1", f64::exp_m1),
    ("floor", f64::floor),
    ("log", f64::ln),
    ("log10", f64::log10),
    ("log1p", f64::ln_1p),
    ("log2", f64::log2),
    ("signum", signum),
    ("sin", f64::sin),
    ("sinh", f64::sinh),
    ("sqrt", f64::sqrt),
    ("tan", f64::tan),
    ("tanh", f64::tanh),
];

/// Sign of `v`, zero for zero
fn signum(v: f64) -> f64 {
    if v == 0.0 || v.is_nan() {
        v
    } else {
        v.signum()
    }
}

fn to_f64(value: &ExprValue) -> std::result::Result<f64, EvalexprError> {
    match value {
        ExprValue::Float(f) => Ok(*f),
        ExprValue::Int(i) => Ok(*i as f64),
        _ => Err(EvalexprError::expected_number(value.clone())),
    }
}

fn register_functions(context: &mut HashMapContext) -> Result<()> {
    for &(name, constant) in CONSTANTS {
        context
            .set_value(name.to_string(), ExprValue::Float(constant))
            .map_err(|e| CalcError::expression(format!("Failed to set constant {}: {}", name, e)))?;
    }

    for &(name, function) in UNARY_FUNCTIONS {
        context
            .set_function(
                name.to_string(),
                Function::new(move |arg| Ok(ExprValue::Float(function(to_f64(arg)?)))),
            )
            .map_err(|e| CalcError::expression(format!("Failed to register {}: {}", name, e)))?;
    }

    Ok(())
}

/// Evaluate a compiled formula with `x` bound to `x`
///
/// # Example
/// ```
/// use propmap_calc::evaluate_formula;
/// use propmap_model::Formula;
///
/// let formula = Formula::compile("(x - 32) * 5/9");
/// let celsius = evaluate_formula(&formula, 212.0).unwrap();
/// assert!((celsius - 100.0).abs() < 1e-9);
/// ```
pub fn evaluate_formula(formula: &Formula, x: f64) -> Result<f64> {
    let tree = formula.tree().map_err(|e| {
        CalcError::expression(format!("Failed to compile '{}': {}", formula.source(), e))
    })?;

    let mut context = HashMapContext::new();
    register_functions(&mut context)?;
    context
        .set_value(FORMULA_VARIABLE.to_string(), ExprValue::Float(x))
        .map_err(|e| CalcError::expression(format!("Failed to set variable x: {}", e)))?;

    let result = tree.eval_with_context(&context).map_err(|e| {
        CalcError::expression(format!("Failed to evaluate '{}': {}", formula.source(), e))
    })?;

    match result {
        ExprValue::Float(f) if f.is_finite() => Ok(f),
        ExprValue::Float(f) => Err(CalcError::NonFinite(format!("{} = {}", formula.source(), f))),
        ExprValue::Int(i) => Ok(i as f64),
        _ => Err(CalcError::expression(format!(
            "Expression did not evaluate to a number: {}",
            formula.source()
        ))),
    }
}

/// Numeric reading of a raw property value
///
/// Numbers are used directly; strings are parsed after trimming.
pub fn to_number(raw: &Value) -> Result<f64> {
    match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| CalcError::non_numeric(n.to_string())),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| CalcError::non_numeric(s.clone())),
        other => Err(CalcError::non_numeric(other.to_string())),
    }
}
