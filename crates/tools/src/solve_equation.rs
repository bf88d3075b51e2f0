//! `solveEquation`: real roots of a one-variable equation.
//!
//! The equation `lhs = rhs` becomes `f(v) = lhs - rhs`. `f` is sampled on a
//! `sinh` grid (dense near zero, reaching about ±2.4e8), sign changes are
//! refined by bisection, and sampled minima of `|f|` that touch zero are
//! refined by ternary search so double roots like `(x - 1)^2 = 0` are found.

use async_trait::async_trait;
use lyra_core::error::ToolError;
use lyra_core::tool::{Tool, ToolResult};
use std::collections::HashMap;

use crate::expression::{Expression, MathError, format_number};

const GRID_HALF_WIDTH: f64 = 20.0;
const GRID_STEPS: usize = 40_000;
const REFINE_ITERATIONS: usize = 200;
const ROOT_TOLERANCE: f64 = 1e-9;

pub struct SolveEquationTool;

#[async_trait]
impl Tool for SolveEquationTool {
    fn name(&self) -> &str {
        "solveEquation"
    }

    fn description(&self) -> &str {
        "Solve algebraic equations (e.g., \"x^2 + 3x - 4 = 0\")."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["equation", "solveFor"],
            "properties": {
                "equation": {
                    "type": "string",
                    "description": "Algebraic equation to solve (e.g., \"x^2 + 3x - 4 = 0\")."
                },
                "solveFor": {
                    "type": "string",
                    "description": "The variable in the equation to solve for, for example `x`"
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let equation = arguments["equation"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'equation' argument".into()))?;
        let variable = arguments["solveFor"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'solveFor' argument".into()))?
            .trim();

        let equation = equation.to_string();
        let variable = variable.to_string();
        // Sampling is CPU-bound
        let outcome = tokio::task::spawn_blocking(move || solve(&equation, &variable))
            .await
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "solveEquation".into(),
                reason: e.to_string(),
            })?;

        match outcome {
            Ok(roots) if roots.is_empty() => Ok(ToolResult::ok("[]")),
            Ok(roots) => {
                let formatted: Vec<String> = roots.into_iter().map(format_number).collect();
                Ok(ToolResult::ok(format!("[{}]", formatted.join(","))))
            }
            Err(e) => Ok(ToolResult::failed(format!("Equation solving error: {e}"))),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SolveError {
    #[error("{0}")]
    Math(#[from] MathError),

    #[error("expected an equation of the form `lhs = rhs`")]
    NotAnEquation,

    #[error("'{0}' is not a valid variable name")]
    InvalidVariable(String),

    #[error("the equation contains other unknowns: {0}")]
    ExtraUnknowns(String),
}

/// Find the real roots of `equation` in `variable`, ascending.
///
/// An equation that holds for every sampled value (e.g. `x = x`) reports no
/// isolated roots.
pub fn solve(equation: &str, variable: &str) -> Result<Vec<f64>, SolveError> {
    if variable.is_empty() || !variable.chars().all(|c| c.is_alphanumeric() || c == '_') {
        return Err(SolveError::InvalidVariable(variable.to_string()));
    }

    let parsed = Expression::parse(equation)?;
    let residual = parsed.equation_residual().ok_or(SolveError::NotAnEquation)?;

    let extra: Vec<String> = residual
        .variables()
        .into_iter()
        .filter(|v| v != variable && !matches!(v.as_str(), "pi" | "PI" | "e" | "E" | "tau"))
        .collect();
    if !extra.is_empty() {
        return Err(SolveError::ExtraUnknowns(extra.join(", ")));
    }

    let mut vars = HashMap::from([(variable.to_string(), 0.0)]);
    let mut f = |x: f64| -> Option<f64> {
        vars.insert(variable.to_string(), x);
        residual.evaluate_number(&vars).ok().filter(|y| y.is_finite())
    };

    let samples: Vec<(f64, Option<f64>)> = (0..=GRID_STEPS)
        .map(|i| {
            let t = -GRID_HALF_WIDTH + 2.0 * GRID_HALF_WIDTH * i as f64 / GRID_STEPS as f64;
            let x = t.sinh();
            (x, f(x))
        })
        .collect();

    let mut roots = Vec::new();

    for pair in samples.windows(2) {
        let ((a, fa), (b, fb)) = (pair[0], pair[1]);
        let (Some(fa), Some(fb)) = (fa, fb) else { continue };

        if fa == 0.0 {
            roots.push(a);
        } else if fa.signum() != fb.signum() && fb != 0.0 {
            if let Some(root) = bisect(&mut f, a, b, fa) {
                roots.push(root);
            }
        }
    }
    if let Some((x, Some(y))) = samples.last() {
        if *y == 0.0 {
            roots.push(*x);
        }
    }

    // Touching roots: |f| dips towards zero without changing sign
    for triple in samples.windows(3) {
        let (Some(l), Some(m), Some(r)) = (triple[0].1, triple[1].1, triple[2].1) else {
            continue;
        };
        if m != 0.0 && l.signum() == m.signum() && m.signum() == r.signum() && m.abs() < l.abs() && m.abs() <= r.abs() {
            if let Some(root) = ternary_min(&mut f, triple[0].0, triple[2].0) {
                roots.push(root);
            }
        }
    }

    roots.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mut cleaned: Vec<f64> = Vec::new();
    for root in roots {
        let rounded = round_to(root, 10);
        if cleaned
            .last()
            .is_none_or(|prev| (rounded - prev).abs() > 1e-7 * rounded.abs().max(1.0))
        {
            cleaned.push(rounded);
        }
    }
    Ok(cleaned)
}

/// Bisection on a sign change. Rejects poles (|f| large at convergence).
fn bisect(f: &mut impl FnMut(f64) -> Option<f64>, mut a: f64, mut b: f64, mut fa: f64) -> Option<f64> {
    for _ in 0..REFINE_ITERATIONS {
        let mid = 0.5 * (a + b);
        if mid == a || mid == b {
            break;
        }
        let fm = f(mid)?;
        if fm == 0.0 {
            return Some(mid);
        }
        if fm.signum() == fa.signum() {
            a = mid;
            fa = fm;
        } else {
            b = mid;
        }
    }
    let root = 0.5 * (a + b);
    let value = f(root)?;
    (value.abs() < 1e-6 * root.abs().max(1.0)).then_some(root)
}

/// Minimise |f| on `[a, b]`; a root if the minimum reaches zero.
fn ternary_min(f: &mut impl FnMut(f64) -> Option<f64>, mut a: f64, mut b: f64) -> Option<f64> {
    for _ in 0..REFINE_ITERATIONS {
        let m1 = a + (b - a) / 3.0;
        let m2 = b - (b - a) / 3.0;
        if m1 == a || m2 == b {
            break;
        }
        if f(m1)?.abs() < f(m2)?.abs() {
            b = m2;
        } else {
            a = m1;
        }
    }
    let x = 0.5 * (a + b);
    (f(x)?.abs() < ROOT_TOLERANCE).then_some(x)
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    let rounded = (x * factor).round() / factor;
    if rounded == 0.0 { 0.0 } else { rounded }
}
