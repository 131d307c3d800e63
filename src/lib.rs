//! Per-user retrieval-augmented generation engine.
//!
//! Heterogeneous sources (text, files, crawled pages, repositories) are
//! cleaned, chunked with overlap, embedded in batches, and persisted with
//! their vectors. Conversational queries hybrid-search those chunks, drive
//! an LLM with a deterministic prompt, attribute sources, and keep a
//! compact long-term memory of user facts.
//!
//! ```text
//! SourceContent ──► engine::Engine ──► ingestion pipeline
//!                       │                 validate → clean → chunk
//!                       │                 → embed (batched) → persist
//!                       ▼
//!                  store (Postgres + pgvector)
//!                       ▲
//! ChatService ──► QueryPipeline ──► HybridSearchEngine
//!      │               │
//!      │               └─► prompt builder ──► LlmClient (unary / stream)
//!      └─► MemoryExtractor ──► user_memories
//! ```
//!
//! The RPC transport, the embedding network, the LLM, and the headless
//! browser are external collaborators behind the seams in [`llm`],
//! [`embedding::provider`], and [`ingestion::scrapers::browser`].

pub mod chat;
pub mod config;
pub mod embedding;
pub mod engine;
pub mod error;
pub mod ingestion;
pub mod llm;
pub mod query;
pub mod retry;
pub mod service;
pub mod store;
pub mod telemetry;

pub use chat::{ChatOptions, ChatResponse, ChatService};
pub use config::Config;
pub use engine::{AddResourceOutcome, Engine, ResourceStatus, SourceContent};
pub use error::{EngineError, ErrorCategory, Result, StreamErrorCode};
pub use llm::{GenerationOptions, LlmClient, Message, TokenUsage};
pub use query::{QueryPipeline, StreamEvent};
