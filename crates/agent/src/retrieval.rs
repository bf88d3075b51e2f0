//! Retrieval augmentation of the user's question.

use lyra_memory::Retriever;
use tracing::info;

/// Context line used when the store has nothing relevant.
pub const NO_CONTEXT: &str = "No relevant context found.";

/// Wrap a question with retrieved context.
pub fn augmented_prompt(context: Option<&str>, question: &str) -> String {
    let context = context.filter(|c| !c.is_empty()).unwrap_or(NO_CONTEXT);
    format!("Use the following context to answer the question:\n{context}\n\nQuestion: {question}\nAnswer:")
}

/// Search the store for `question` and build the augmented prompt.
pub async fn augment(retriever: &Retriever, question: &str) -> lyra_core::Result<String> {
    let context = retriever.context(question).await?;
    info!(found = context.is_some(), "Searched references");
    Ok(augmented_prompt(context.as_deref(), question))
}
