//! Transport-agnostic service surfaces the RPC edge delegates to.

pub mod health;
pub mod upload;

pub use health::{HealthService, HealthStatus, Readiness};
pub use upload::{
    AssembledUpload, ChunkedUploadAssembler, MAX_CHUNK_SIZE, MAX_TOTAL_SIZE, UploadFrame,
    UploadMetadata,
};
