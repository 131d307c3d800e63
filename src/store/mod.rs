//! Persistent entities and their storage operations.
//!
//! Every mutation happens inside a scoped transaction acquired per logical
//! operation: commit on success, rollback on any error inside the scope.
//! Cross-request coordination goes through these rows, never through
//! in-process locks.

pub mod conversations;
pub mod db;
pub mod documents;
pub mod jobs;
pub mod memory;
pub mod models;

pub use conversations::ConversationStore;
pub use documents::{DocumentStore, NewDocument};
pub use jobs::JobStore;
pub use memory::MemoryStore;
pub use models::{
    ChatMessageRow, Conversation, Document, DocumentChunk, IngestionJob, JobStatus, SourceRef,
    UserMemoryRow,
};
