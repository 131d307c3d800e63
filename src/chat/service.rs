//! Chat sessions: persistence, RAG delegation, streaming, and titles.
//!
//! `send_message` persists the user turn, runs the query pipeline, persists
//! the assistant turn, and then updates the user's long-term memory. The
//! user message for a turn is durable before the assistant message exists.
//! `stream_chat` mirrors the same flow over a chunk stream.

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::chat::memory::{MemoryExtractor, MemoryUpdate};
use crate::error::{EngineError, Result, StreamErrorCode, format_stream_error};
use crate::llm::{GenerationOptions, Message};
use crate::query::{QueryOptions, QueryPipeline, StreamEvent};
use crate::store::models::{ChatMessageRow, SourceRef};
use crate::store::{ConversationStore, MemoryStore};

/// Only this many trailing history messages are fed back to the LLM; the
/// full history stays in storage.
pub const HISTORY_WINDOW: usize = 40;

/// Per-request chat configuration. Unknown keys are rejected, not ignored.
#[derive(Clone, Debug)]
pub struct ChatOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub use_rag: bool,
    pub model: Option<String>,
    pub context_limit: Option<usize>,
}

impl Default for ChatOptions {
    fn default() -> Self {
        Self {
            temperature: None,
            max_tokens: None,
            use_rag: true,
            model: None,
            context_limit: None,
        }
    }
}

impl ChatOptions {
    /// Parse a dynamic config map, rejecting unknown keys.
    pub fn from_json(config: &serde_json::Map<String, serde_json::Value>) -> Result<Self> {
        let mut options = Self::default();
        for (key, value) in config {
            match key.as_str() {
                "temperature" => {
                    options.temperature = Some(value.as_f64().ok_or_else(|| {
                        EngineError::Validation("temperature must be a number".into())
                    })? as f32);
                }
                "max_tokens" => {
                    options.max_tokens = Some(value.as_u64().ok_or_else(|| {
                        EngineError::Validation("max_tokens must be an integer".into())
                    })? as u32);
                }
                "use_rag" => {
                    options.use_rag = value.as_bool().ok_or_else(|| {
                        EngineError::Validation("use_rag must be a boolean".into())
                    })?;
                }
                "model" => {
                    options.model = Some(
                        value
                            .as_str()
                            .ok_or_else(|| {
                                EngineError::Validation("model must be a string".into())
                            })?
                            .to_string(),
                    );
                }
                "context_limit" => {
                    options.context_limit = Some(value.as_u64().ok_or_else(|| {
                        EngineError::Validation("context_limit must be an integer".into())
                    })? as usize);
                }
                other => {
                    return Err(EngineError::Validation(format!(
                        "unknown chat config key: {other}"
                    )));
                }
            }
        }
        Ok(options)
    }

    fn query_options(&self) -> QueryOptions {
        QueryOptions {
            context_limit: self.context_limit,
            use_rag: self.use_rag,
            generation: GenerationOptions {
                temperature: self.temperature,
                max_tokens: self.max_tokens,
                model: self.model.clone(),
            },
        }
    }
}

/// Counters returned alongside every chat response.
#[derive(Clone, Debug, Default)]
pub struct ChatMetrics {
    pub tokens_used: u32,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub latency_ms: f64,
    pub sources_retrieved: usize,
}

/// Response of a unary chat exchange.
#[derive(Clone, Debug)]
pub struct ChatResponse {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub response: String,
    pub sources: Vec<SourceRef>,
    pub metrics: ChatMetrics,
    pub created_at: DateTime<Utc>,
}

/// Payload of one streamed chat chunk.
#[derive(Clone, Debug)]
pub enum ChatStreamPayload {
    Source(SourceRef),
    Token(String),
    Metrics(ChatMetrics),
    Error(String),
}

/// One frame of a streaming chat response.
#[derive(Clone, Debug)]
pub struct ChatStreamChunk {
    pub conversation_id: Uuid,
    pub message_id: Uuid,
    pub payload: ChatStreamPayload,
    pub is_final: bool,
}

impl ChatStreamChunk {
    /// Terminal chunk the transport emits when the request deadline elapses
    /// mid-stream.
    pub fn deadline_exceeded(conversation_id: Uuid, message_id: Uuid) -> Self {
        Self {
            conversation_id,
            message_id,
            payload: ChatStreamPayload::Error(
                "DEADLINE_EXCEEDED: Request deadline exceeded during streaming".to_string(),
            ),
            is_final: true,
        }
    }
}

/// One page of conversation history.
#[derive(Clone, Debug)]
pub struct ConversationPage {
    pub conversation_id: Uuid,
    pub messages: Vec<ChatMessageRow>,
    pub next_cursor: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

#[derive(Clone)]
pub struct ChatService {
    pool: PgPool,
    conversations: ConversationStore,
    memories: MemoryStore,
    pipeline: QueryPipeline,
    extractor: MemoryExtractor,
}

impl ChatService {
    pub fn new(
        pool: PgPool,
        conversations: ConversationStore,
        memories: MemoryStore,
        pipeline: QueryPipeline,
    ) -> Self {
        let extractor = MemoryExtractor::new(pipeline.llm());
        Self {
            pool,
            conversations,
            memories,
            pipeline,
            extractor,
        }
    }

    /// Send a message, persist both turns, and return the full response.
    #[instrument(skip(self, message, metadata, options))]
    pub async fn send_message(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        message: &str,
        metadata: serde_json::Value,
        options: &ChatOptions,
    ) -> Result<ChatResponse> {
        let requested_id = parse_conversation_id(conversation_id);

        // The user turn commits before generation begins, so it is durable
        // even if everything after fails.
        let mut tx = self.pool.begin().await?;
        let conversation = self
            .conversations
            .get_or_create_conversation(&mut tx, user_id, requested_id)
            .await?;
        let user_row = self
            .conversations
            .add_message(
                &mut tx,
                conversation.id,
                None,
                Message::USER,
                message,
                &[],
                metadata,
            )
            .await?;
        tx.commit().await?;

        let all_messages = self.full_history(conversation.id).await?;
        let history = history_window(&all_messages, user_row.id);
        let user_memory = self.memories.get_memory(user_id).await?;

        let query_response = self
            .pipeline
            .generate_response(
                message,
                user_id,
                &history,
                &options.query_options(),
                user_memory.as_deref(),
            )
            .await?;

        let metrics_json = serde_json::json!({
            "metrics": {
                "retrieval_time_ms": query_response.metrics.retrieval_time_ms,
                "generation_time_ms": query_response.metrics.generation_time_ms,
                "total_time_ms": query_response.metrics.total_time_ms,
                "sources_retrieved": query_response.metrics.sources_retrieved,
                "avg_similarity": query_response.metrics.avg_similarity,
            }
        });

        let mut tx = self.pool.begin().await?;
        let assistant_row = self
            .conversations
            .add_message(
                &mut tx,
                conversation.id,
                None,
                Message::ASSISTANT,
                &query_response.response,
                &query_response.sources,
                metrics_json,
            )
            .await?;
        tx.commit().await?;

        self.update_memory_after_exchange(user_id, user_memory.as_deref(), conversation.id)
            .await;

        Ok(ChatResponse {
            conversation_id: conversation.id,
            message_id: assistant_row.id,
            response: query_response.response,
            sources: query_response.sources,
            metrics: ChatMetrics {
                tokens_used: query_response.metrics.tokens_generated,
                prompt_tokens: query_response.metrics.prompt_tokens,
                completion_tokens: query_response.metrics.completion_tokens,
                latency_ms: query_response.metrics.total_time_ms,
                sources_retrieved: query_response.metrics.sources_retrieved,
            },
            created_at: assistant_row.created_at,
        })
    }

    /// Stream a chat response.
    ///
    /// Chunk order per stream: sources (one chunk each), tokens, then
    /// exactly one final chunk carrying metrics or a structured error. On a
    /// mid-stream failure the partial assistant text is still persisted,
    /// flagged `{"truncated": "true"}`.
    pub async fn stream_chat(
        &self,
        user_id: &str,
        conversation_id: Option<&str>,
        message: &str,
        metadata: serde_json::Value,
        options: &ChatOptions,
    ) -> Result<impl Stream<Item = ChatStreamChunk> + Send + use<>> {
        let requested_id = parse_conversation_id(conversation_id);

        let mut tx = self.pool.begin().await?;
        let conversation = self
            .conversations
            .get_or_create_conversation(&mut tx, user_id, requested_id)
            .await?;
        let user_row = self
            .conversations
            .add_message(
                &mut tx,
                conversation.id,
                None,
                Message::USER,
                message,
                &[],
                metadata,
            )
            .await?;
        tx.commit().await?;

        let all_messages = self.full_history(conversation.id).await?;
        let history = history_window(&all_messages, user_row.id);
        let user_memory = self.memories.get_memory(user_id).await?;

        let message_id = Uuid::new_v4();
        let conversation_id = conversation.id;
        let (tx_chunks, rx_chunks) = flume::unbounded::<ChatStreamChunk>();

        let events = self.pipeline.stream_response(
            message.to_string(),
            user_id.to_string(),
            history,
            options.query_options(),
            user_memory.clone(),
        );

        let service = self.clone();
        let user_id = user_id.to_string();
        tokio::spawn(async move {
            let mut events = Box::pin(events);
            let mut full_response = String::new();
            let mut all_sources: Vec<SourceRef> = Vec::new();
            let mut retrieval_metrics: Option<crate::query::RetrievalMetrics> = None;

            let send = |chunk: ChatStreamChunk| tx_chunks.send(chunk).is_ok();

            while let Some(event) = events.next().await {
                match event {
                    StreamEvent::Sources { sources, metrics } => {
                        retrieval_metrics = Some(metrics);
                        all_sources = sources;
                        for source in &all_sources {
                            if !send(ChatStreamChunk {
                                conversation_id,
                                message_id,
                                payload: ChatStreamPayload::Source(source.clone()),
                                is_final: false,
                            }) {
                                return;
                            }
                        }
                    }
                    StreamEvent::Token(token) => {
                        full_response.push_str(&token);
                        if !send(ChatStreamChunk {
                            conversation_id,
                            message_id,
                            payload: ChatStreamPayload::Token(token),
                            is_final: false,
                        }) {
                            return;
                        }
                    }
                    StreamEvent::Metrics(metrics) => {
                        let final_metrics = ChatMetrics {
                            tokens_used: metrics.tokens_generated,
                            prompt_tokens: 0,
                            completion_tokens: metrics.tokens_generated,
                            latency_ms: metrics.total_time_ms,
                            sources_retrieved: metrics.sources_retrieved,
                        };
                        send(ChatStreamChunk {
                            conversation_id,
                            message_id,
                            payload: ChatStreamPayload::Metrics(final_metrics),
                            is_final: true,
                        });

                        service
                            .persist_assistant_turn(
                                conversation_id,
                                message_id,
                                &full_response,
                                &all_sources,
                                serde_json::json!({
                                    "metrics": {
                                        "retrieval_time_ms": metrics.retrieval_time_ms,
                                        "generation_time_ms": metrics.generation_time_ms,
                                        "total_time_ms": metrics.total_time_ms,
                                        "tokens_generated": metrics.tokens_generated,
                                    }
                                }),
                            )
                            .await;
                        service
                            .update_memory_after_exchange(
                                &user_id,
                                user_memory.as_deref(),
                                conversation_id,
                            )
                            .await;
                        return;
                    }
                    StreamEvent::Error(error) => {
                        let code = StreamErrorCode::classify(&error);
                        let structured = format_stream_error(code, &error);
                        error!("stream error: {structured}");

                        // Clients first learn how much work was done, then
                        // why it stopped.
                        let token_count = full_response.split_whitespace().count() as u32;
                        if retrieval_metrics.is_some() || token_count > 0 {
                            let partial = ChatMetrics {
                                tokens_used: token_count,
                                prompt_tokens: 0,
                                completion_tokens: token_count,
                                latency_ms: retrieval_metrics
                                    .as_ref()
                                    .map(|m| m.retrieval_time_ms)
                                    .unwrap_or(0.0),
                                sources_retrieved: all_sources.len(),
                            };
                            if !send(ChatStreamChunk {
                                conversation_id,
                                message_id,
                                payload: ChatStreamPayload::Metrics(partial),
                                is_final: false,
                            }) {
                                return;
                            }
                        }
                        send(ChatStreamChunk {
                            conversation_id,
                            message_id,
                            payload: ChatStreamPayload::Error(structured),
                            is_final: true,
                        });

                        if !full_response.is_empty() {
                            service
                                .persist_assistant_turn(
                                    conversation_id,
                                    message_id,
                                    &full_response,
                                    &all_sources,
                                    serde_json::json!({"truncated": "true"}),
                                )
                                .await;
                        }
                        return;
                    }
                }
            }
        });

        Ok(rx_chunks.into_stream())
    }

    /// Fetch one page of a conversation using integer-offset cursors.
    pub async fn get_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<ConversationPage> {
        let conv_id = Uuid::parse_str(conversation_id).map_err(|_| {
            EngineError::Validation(format!("invalid conversation ID: {conversation_id}"))
        })?;

        let conversation = self
            .conversations
            .get_conversation(conv_id)
            .await?
            .ok_or(EngineError::NotFound {
                kind: "conversation",
                id: conversation_id.to_string(),
            })?;
        if conversation.user_id != user_id {
            warn!(
                conversation_id,
                "conversation access denied for another user"
            );
            return Err(EngineError::PermissionDenied(format!(
                "conversation {conversation_id} belongs to another user"
            )));
        }

        let offset = cursor
            .and_then(|c| c.parse::<i64>().ok())
            .unwrap_or_default()
            .max(0);
        let limit = limit.max(1);

        // Probe one row past the limit to learn whether a next page exists.
        let mut messages = self
            .conversations
            .get_messages(conv_id, limit as i64 + 1, offset)
            .await?;
        let next_cursor = if messages.len() > limit {
            messages.truncate(limit);
            Some((offset + limit as i64).to_string())
        } else {
            None
        };

        Ok(ConversationPage {
            conversation_id: conv_id,
            messages,
            next_cursor,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
            metadata: conversation.metadata,
        })
    }

    /// Delete a conversation the user owns. Returns `false` when missing or
    /// owned by someone else.
    pub async fn delete_conversation(&self, user_id: &str, conversation_id: &str) -> Result<bool> {
        let Ok(conv_id) = Uuid::parse_str(conversation_id) else {
            return Ok(false);
        };
        match self.conversations.get_conversation(conv_id).await? {
            Some(conv) if conv.user_id == user_id => {
                self.conversations.delete_conversation(conv_id).await
            }
            _ => Ok(false),
        }
    }

    pub async fn list_conversations(
        &self,
        user_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<crate::store::Conversation>> {
        self.conversations
            .list_user_conversations(user_id, limit as i64, offset as i64)
            .await
    }

    /// Generate a 3–5 word conversation title from the opening exchange.
    pub async fn generate_title(
        &self,
        conversation_id: &str,
        user_message: &str,
        assistant_message: &str,
    ) -> String {
        let user_excerpt: String = user_message.chars().take(200).collect();
        let assistant_excerpt: String = assistant_message.chars().take(300).collect();

        let prompt = format!(
            "Generate a concise, 3-5 word title for this conversation.\n\
             The title should capture the main topic or question.\n\n\
             User: {user_excerpt}\n\
             Assistant: {assistant_excerpt}\n\n\
             Respond with ONLY the title, nothing else. Do not use quotes."
        );

        let options = GenerationOptions {
            temperature: Some(0.3),
            max_tokens: Some(15),
            model: None,
        };

        let fallback = || {
            user_message
                .lines()
                .next()
                .unwrap_or("")
                .trim()
                .chars()
                .take(50)
                .collect::<String>()
        };

        match self
            .pipeline
            .llm()
            .generate(&[Message::user(prompt)], &options)
            .await
        {
            Ok((raw, _)) => {
                let title = strip_surrounding_quotes(raw.trim()).trim().to_string();
                if title.is_empty() || title.chars().count() > 100 {
                    warn!(conversation_id, %title, "rejecting generated title");
                    fallback()
                } else {
                    title
                }
            }
            Err(e) => {
                error!(conversation_id, "title generation failed: {e}");
                fallback()
            }
        }
    }

    async fn full_history(&self, conversation_id: Uuid) -> Result<Vec<ChatMessageRow>> {
        self.conversations
            .get_messages(conversation_id, i64::MAX, 0)
            .await
    }

    async fn persist_assistant_turn(
        &self,
        conversation_id: Uuid,
        message_id: Uuid,
        content: &str,
        sources: &[SourceRef],
        metadata: serde_json::Value,
    ) {
        let result: Result<()> = async {
            let mut tx = self.pool.begin().await?;
            self.conversations
                .add_message(
                    &mut tx,
                    conversation_id,
                    Some(message_id),
                    Message::ASSISTANT,
                    content,
                    sources,
                    metadata,
                )
                .await?;
            tx.commit().await?;
            Ok(())
        }
        .await;
        if let Err(e) = result {
            error!(conversation_id = %conversation_id, "failed to persist assistant message: {e}");
        }
    }

    /// Run the memory extractor over the finished exchange and apply its
    /// verdict. Failures are logged, never surfaced to the caller.
    async fn update_memory_after_exchange(
        &self,
        user_id: &str,
        memory_before: Option<&str>,
        conversation_id: Uuid,
    ) {
        let recent = match self.full_history(conversation_id).await {
            Ok(rows) => rows
                .iter()
                .map(|row| Message::new(&row.role, row.content.clone()))
                .collect::<Vec<_>>(),
            Err(e) => {
                warn!("skipping memory update, history fetch failed: {e}");
                return;
            }
        };

        match self.extractor.extract(memory_before, &recent).await {
            Ok(MemoryUpdate::Forget) => {
                info!(user_id, "user asked to be forgotten, deleting memory");
                if let Err(e) = self.memories.delete_memory(user_id).await {
                    error!("failed to delete user memory: {e}");
                }
            }
            Ok(MemoryUpdate::Set(memory)) => {
                if let Err(e) = self.memories.upsert_memory(user_id, &memory).await {
                    error!("failed to update user memory: {e}");
                }
            }
            Ok(MemoryUpdate::NoChange) => {}
            Err(e) => warn!("memory extraction errored: {e}"),
        }
    }
}

fn parse_conversation_id(conversation_id: Option<&str>) -> Option<Uuid> {
    conversation_id
        .filter(|s| !s.is_empty())
        .and_then(|s| Uuid::parse_str(s).ok())
}

/// History fed to the LLM: everything before the just-appended user message,
/// capped to the trailing [`HISTORY_WINDOW`].
fn history_window(all_messages: &[ChatMessageRow], current_user_message: Uuid) -> Vec<Message> {
    let prior: Vec<Message> = all_messages
        .iter()
        .filter(|row| row.id != current_user_message)
        .map(|row| Message::new(&row.role, row.content.clone()))
        .collect();
    let start = prior.len().saturating_sub(HISTORY_WINDOW);
    prior[start..].to_vec()
}

fn strip_surrounding_quotes(s: &str) -> &str {
    let s = s
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
        .unwrap_or(s);
    s.strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .unwrap_or(s)
}
