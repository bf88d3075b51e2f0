//! `dataStoreSearch`: similarity search over ingested documents.

use async_trait::async_trait;
use lyra_core::error::ToolError;
use lyra_core::tool::{Tool, ToolResult};
use lyra_memory::Retriever;
use tracing::warn;

/// Reported in place of documents when the search finds nothing.
const NO_DOCUMENTS: &str = "No relevant documents found.";

pub struct DataStoreSearchTool {
    retriever: Retriever,
}

impl DataStoreSearchTool {
    pub fn new(retriever: Retriever) -> Self {
        Self { retriever }
    }
}

#[async_trait]
impl Tool for DataStoreSearchTool {
    fn name(&self) -> &str {
        "dataStoreSearch"
    }

    fn description(&self) -> &str {
        "Search for information."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "required": ["query"],
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The information to search for."
                }
            }
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let query = arguments["query"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'query' argument".into()))?;

        match self.retriever.context(query).await {
            Ok(context) => {
                let context = context.as_deref().unwrap_or(NO_DOCUMENTS);
                Ok(ToolResult::ok(format!(
                    "The following information is from your dataStoreSearch search:\n`{context}`\n\n The dataStoreSearch search query you used: `{query}`\n"
                )))
            }
            Err(e) => {
                warn!(error = %e, "dataStoreSearch failed");
                Ok(ToolResult::failed(format!("Error during vector store search: {e}")))
            }
        }
    }
}
