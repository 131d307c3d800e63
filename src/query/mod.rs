//! Retrieval and generation.

pub mod pipeline;
pub mod prompt;
pub mod retrieval;

pub use pipeline::{
    QueryContext, QueryMetrics, QueryOptions, QueryPipeline, QueryResponse, RetrievalMetrics,
    StreamEvent, StreamMetrics, optimize_context,
};
pub use retrieval::{HybridSearchEngine, Retriever, SearchResult};
