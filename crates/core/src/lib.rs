//! # Lyra Core
//!
//! Domain types, traits, and error definitions for the Lyra agent controller.
//! This crate has no framework dependencies: it defines the model that the
//! backend, tool, vector store, and gateway crates implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is a trait here:
//! - [`InferenceBackend`]: the language model server
//! - [`Tool`]: a callable capability advertised to the model
//! - [`VectorStore`]: document retrieval by embedding
//! - [`IngestQueue`]: out-of-band document ingestion
//!
//! Implementations live in their own crates, so tests can swap in scripted
//! stand-ins without touching the orchestration code.

pub mod error;
pub mod event;
pub mod ingest;
pub mod message;
pub mod provider;
pub mod tool;
pub mod vector_store;

// Re-export key types at crate root for ergonomics
pub use error::{Error, Result};
pub use event::{DomainEvent, EventBus};
pub use ingest::{IngestBatch, IngestFile, IngestQueue};
pub use message::{FunctionCall, Message, Role, ToolCall};
pub use provider::{ChatReply, ChatRequest, FragmentStream, InferenceBackend, ModelInfo, StreamFragment};
pub use tool::{Tool, ToolDefinition, ToolRegistry, ToolResult};
pub use vector_store::{Document, ScoredDocument, VectorStore};
