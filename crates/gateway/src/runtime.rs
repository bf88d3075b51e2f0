//! Builds the shared subsystems once, from configuration.

use lyra_agent::Orchestrator;
use lyra_config::AppConfig;
use lyra_core::tool::ToolRegistry;
use lyra_core::{EventBus, InferenceBackend, VectorStore};
use lyra_memory::{IngestWorker, Retriever};
use std::sync::Arc;

/// Backend, store, tools and orchestrator wired together.
#[derive(Clone)]
pub struct Runtime {
    pub backend: Arc<dyn InferenceBackend>,
    pub store: Arc<dyn VectorStore>,
    pub tools: Arc<ToolRegistry>,
    pub events: Arc<EventBus>,
    pub orchestrator: Orchestrator,
}

impl Runtime {
    pub fn from_config(config: &AppConfig) -> lyra_core::Result<Self> {
        let backend = lyra_providers::build_backend(config)?;
        let store = lyra_memory::build_vector_store(config)?;
        Ok(Self::with_parts(backend, store, config))
    }

    /// Wire the given backend and store. Tests use this with scripted parts.
    pub fn with_parts(backend: Arc<dyn InferenceBackend>, store: Arc<dyn VectorStore>, config: &AppConfig) -> Self {
        let tools = Arc::new(lyra_tools::default_registry(backend.clone(), store.clone(), config));
        let events = Arc::new(EventBus::default());
        let retriever = Retriever::from_config(backend.clone(), store.clone(), config);
        let orchestrator = Orchestrator::from_config(backend.clone(), tools.clone(), retriever, config)
            .with_events(events.clone());

        Self {
            backend,
            store,
            tools,
            events,
            orchestrator,
        }
    }

    /// The background indexer feeding this runtime's store.
    pub fn ingest_worker(&self, config: &AppConfig) -> IngestWorker {
        IngestWorker::new(self.backend.clone(), self.store.clone(), config.embedding_model.clone())
            .with_events(self.events.clone())
    }
}
