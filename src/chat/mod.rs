//! Conversational sessions and long-term user memory.

pub mod memory;
pub mod service;

pub use memory::{MemoryExtractor, MemoryUpdate};
pub use service::{
    ChatMetrics, ChatOptions, ChatResponse, ChatService, ChatStreamChunk, ChatStreamPayload,
    ConversationPage, HISTORY_WINDOW,
};
