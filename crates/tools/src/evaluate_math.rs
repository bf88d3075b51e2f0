//! `evaluateMathExpression`: evaluates a non-algebraic math expression.

use async_trait::async_trait;
use lyra_core::error::ToolError;
use lyra_core::tool::{Tool, ToolResult};

use crate::expression;

pub struct EvaluateMathTool;

#[async_trait]
impl Tool for EvaluateMathTool {
    fn name(&self) -> &str {
        "evaluateMathExpression"
    }

    fn description(&self) -> &str {
        "Solve any math problem that is not algebraic"
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["expression"],
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "Math expression to evaluate (e.g. \"2 + 3 * (4 - 5)\")."
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let expr = arguments["expression"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        match expression::evaluate(expr) {
            Ok(value) => Ok(ToolResult::ok(value.to_string())),
            Err(e) => Ok(ToolResult::failed(format!("Math evaluation error: {e}"))),
        }
    }
}
