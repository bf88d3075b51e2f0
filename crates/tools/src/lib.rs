//! Built-in tools for the Lyra agent.
//!
//! Three tools are advertised to tool-capable models, in this order:
//! `dataStoreSearch` (similarity search over ingested documents),
//! `evaluateMathExpression` and `solveEquation`.

pub mod data_store_search;
pub mod evaluate_math;
pub mod expression;
pub mod solve_equation;

pub use data_store_search::DataStoreSearchTool;
pub use evaluate_math::EvaluateMathTool;
pub use solve_equation::SolveEquationTool;

use lyra_config::AppConfig;
use lyra_core::tool::ToolRegistry;
use lyra_core::{InferenceBackend, VectorStore};
use lyra_memory::Retriever;
use std::sync::Arc;

/// Create the registry with every built-in tool.
pub fn default_registry(
    backend: Arc<dyn InferenceBackend>,
    store: Arc<dyn VectorStore>,
    config: &AppConfig,
) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(DataStoreSearchTool::new(Retriever::from_config(
        backend, store, config,
    ))));
    registry.register(Box::new(EvaluateMathTool));
    registry.register(Box::new(SolveEquationTool));
    registry
}
