//! The retrieval→generation pipeline.
//!
//! Unary generation returns a full [`QueryResponse`]; streaming yields
//! [`StreamEvent`]s in the fixed order `Sources → Token* → (Metrics |
//! Error)`, with the sources event always emitted before any token and the
//! terminal event appearing exactly once.

use std::sync::Arc;
use std::time::Instant;

use futures_util::{Stream, StreamExt};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::llm::{GenerationOptions, LlmClient, Message, TokenUsage};
use crate::query::prompt::build_messages;
use crate::query::retrieval::{Retriever, SearchResult};
use crate::store::models::SourceRef;

/// Fallback answer when unary generation fails.
const GENERATION_APOLOGY: &str =
    "I encountered an error generating a response based on the context.";

/// Context retrieved for a query.
#[derive(Clone, Debug, Default)]
pub struct QueryContext {
    pub chunks: Vec<SearchResult>,
    pub context_text: String,
    pub total_chunks: usize,
    pub avg_similarity: f64,
}

/// Timings and counters for one generation.
#[derive(Clone, Debug, Default)]
pub struct QueryMetrics {
    pub retrieval_time_ms: f64,
    pub generation_time_ms: f64,
    pub total_time_ms: f64,
    pub sources_retrieved: usize,
    pub avg_similarity: f64,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub tokens_generated: u32,
}

/// Full unary pipeline output.
#[derive(Clone, Debug)]
pub struct QueryResponse {
    pub response: String,
    pub context: QueryContext,
    pub sources: Vec<SourceRef>,
    pub metrics: QueryMetrics,
}

/// Retrieval-side metrics carried on the sources event.
#[derive(Clone, Debug, Default)]
pub struct RetrievalMetrics {
    pub retrieval_time_ms: f64,
    pub sources_retrieved: usize,
    pub avg_similarity: f64,
}

/// Generation-side metrics carried on the terminal metrics event.
#[derive(Clone, Debug, Default)]
pub struct StreamMetrics {
    pub retrieval_time_ms: f64,
    pub generation_time_ms: f64,
    pub total_time_ms: f64,
    pub tokens_generated: u32,
    pub sources_retrieved: usize,
}

/// Events yielded by [`QueryPipeline::stream_response`].
#[derive(Clone, Debug)]
pub enum StreamEvent {
    /// Emitted exactly once, before any token.
    Sources {
        sources: Vec<SourceRef>,
        metrics: RetrievalMetrics,
    },
    /// One LLM delta, in model order.
    Token(String),
    /// Terminal success event.
    Metrics(StreamMetrics),
    /// Terminal failure event; at most one per stream.
    Error(String),
}

/// Per-call knobs forwarded from chat configuration.
#[derive(Clone, Debug, Default)]
pub struct QueryOptions {
    pub context_limit: Option<usize>,
    pub use_rag: bool,
    pub generation: GenerationOptions,
}

impl QueryOptions {
    pub fn rag() -> Self {
        Self {
            context_limit: None,
            use_rag: true,
            generation: GenerationOptions::default(),
        }
    }
}

/// Retrieve → build prompt → generate.
#[derive(Clone)]
pub struct QueryPipeline {
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn LlmClient>,
    identity: String,
    top_k: usize,
    max_context_tokens: usize,
}

impl QueryPipeline {
    pub fn new(
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn LlmClient>,
        identity: impl Into<String>,
        top_k: usize,
        max_context_tokens: usize,
    ) -> Self {
        Self {
            retriever,
            llm,
            identity: identity.into(),
            top_k,
            max_context_tokens,
        }
    }

    pub fn llm(&self) -> Arc<dyn LlmClient> {
        Arc::clone(&self.llm)
    }

    /// Retrieve and serialize context for a query.
    pub async fn retrieve_context(
        &self,
        query: &str,
        user_id: &str,
        document_id: Option<Uuid>,
        context_limit: Option<usize>,
    ) -> Result<QueryContext> {
        let chunks = self
            .retriever
            .search(query, user_id, self.top_k, document_id)
            .await?;

        if chunks.is_empty() {
            warn!(
                query = %query.chars().take(50).collect::<String>(),
                "no chunks found for query"
            );
            return Ok(QueryContext::default());
        }

        let avg_similarity =
            chunks.iter().map(|c| c.similarity_score).sum::<f64>() / chunks.len() as f64;
        let context_text =
            optimize_context(&chunks, context_limit.unwrap_or(self.max_context_tokens));

        Ok(QueryContext {
            total_chunks: chunks.len(),
            avg_similarity,
            context_text,
            chunks,
        })
    }

    /// Full unary flow. LLM failures degrade to an apology with zero token
    /// usage rather than an error.
    #[instrument(skip_all, fields(user_id))]
    pub async fn generate_response(
        &self,
        query: &str,
        user_id: &str,
        history: &[Message],
        options: &QueryOptions,
        user_memory: Option<&str>,
    ) -> Result<QueryResponse> {
        let retrieval_start = Instant::now();
        let context = if options.use_rag {
            self.retrieve_context(query, user_id, None, options.context_limit)
                .await?
        } else {
            QueryContext::default()
        };
        let retrieval_time_ms = retrieval_start.elapsed().as_secs_f64() * 1000.0;

        let messages = build_messages(
            &self.identity,
            query,
            &context.context_text,
            history,
            user_memory,
        );

        let generation_start = Instant::now();
        let (response_text, usage) = match self.llm.generate(&messages, &options.generation).await
        {
            Ok(result) => result,
            Err(e) => {
                error!("generation failed: {e}");
                (GENERATION_APOLOGY.to_string(), TokenUsage::default())
            }
        };
        let generation_time_ms = generation_start.elapsed().as_secs_f64() * 1000.0;

        let sources = sources_from_chunks(&context.chunks);
        let metrics = QueryMetrics {
            retrieval_time_ms,
            generation_time_ms,
            total_time_ms: retrieval_time_ms + generation_time_ms,
            sources_retrieved: sources.len(),
            avg_similarity: context.avg_similarity,
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            tokens_generated: usage.total_tokens,
        };

        info!(
            sources = sources.len(),
            total_ms = metrics.total_time_ms as u64,
            "generated response"
        );

        Ok(QueryResponse {
            response: response_text,
            context,
            sources,
            metrics,
        })
    }

    /// Streaming flow. The returned stream yields `Sources` first, then
    /// tokens as the model delivers them, then exactly one terminal event.
    pub fn stream_response(
        &self,
        query: String,
        user_id: String,
        history: Vec<Message>,
        options: QueryOptions,
        user_memory: Option<String>,
    ) -> impl Stream<Item = StreamEvent> + Send + use<> {
        let (tx, rx) = flume::unbounded::<StreamEvent>();
        let pipeline = self.clone();

        tokio::spawn(async move {
            let retrieval_start = Instant::now();
            let context = if options.use_rag {
                match pipeline
                    .retrieve_context(&query, &user_id, None, options.context_limit)
                    .await
                {
                    Ok(context) => context,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string()));
                        return;
                    }
                }
            } else {
                QueryContext::default()
            };
            let retrieval_time_ms = retrieval_start.elapsed().as_secs_f64() * 1000.0;

            let sources = sources_from_chunks(&context.chunks);
            let sources_retrieved = sources.len();
            let _ = tx.send(StreamEvent::Sources {
                sources,
                metrics: RetrievalMetrics {
                    retrieval_time_ms,
                    sources_retrieved,
                    avg_similarity: context.avg_similarity,
                },
            });

            let messages = build_messages(
                &pipeline.identity,
                &query,
                &context.context_text,
                &history,
                user_memory.as_deref(),
            );

            let generation_start = Instant::now();
            let mut token_count: u32 = 0;

            let mut deltas = match pipeline.llm.stream(&messages, &options.generation).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("stream generation failed: {e}");
                    let _ = tx.send(StreamEvent::Error(e.to_string()));
                    return;
                }
            };

            while let Some(delta) = deltas.next().await {
                match delta {
                    Ok(token) => {
                        token_count += 1;
                        if tx.send(StreamEvent::Token(token)).is_err() {
                            // Receiver gone; nothing left to do.
                            return;
                        }
                    }
                    Err(e) => {
                        error!("stream generation failed: {e}");
                        let _ = tx.send(StreamEvent::Error(e.to_string()));
                        return;
                    }
                }
            }

            let generation_time_ms = generation_start.elapsed().as_secs_f64() * 1000.0;
            let _ = tx.send(StreamEvent::Metrics(StreamMetrics {
                retrieval_time_ms,
                generation_time_ms,
                total_time_ms: retrieval_time_ms + generation_time_ms,
                tokens_generated: token_count,
                sources_retrieved,
            }));
        });

        rx.into_stream()
    }
}

/// Greedily pack the highest-scoring chunks into a token budget.
///
/// Tokens are estimated at four characters each. Each kept chunk is
/// serialized with its 1-based position, rounded score, and document id.
pub fn optimize_context(chunks: &[SearchResult], max_context_tokens: usize) -> String {
    if chunks.is_empty() {
        return String::new();
    }

    let mut sorted: Vec<&SearchResult> = chunks.iter().collect();
    sorted.sort_by(|a, b| {
        b.similarity_score
            .partial_cmp(&a.similarity_score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });

    let mut parts = Vec::new();
    let mut total_tokens = 0usize;

    for (i, chunk) in sorted.iter().enumerate() {
        let chunk_tokens = chunk.content.chars().count() / 4;
        if total_tokens + chunk_tokens > max_context_tokens {
            break;
        }
        parts.push(format!(
            "[Source {} | Score: {:.3} | Doc: {}]\n{}",
            i + 1,
            chunk.similarity_score,
            chunk.document_id,
            chunk.content
        ));
        total_tokens += chunk_tokens;
    }

    parts.join("\n\n")
}

fn sources_from_chunks(chunks: &[SearchResult]) -> Vec<SourceRef> {
    chunks
        .iter()
        .map(|c| SourceRef {
            chunk_id: c.chunk_id,
            document_id: c.document_id,
            relevance_score: c.similarity_score as f32,
            content: Some(c.content.clone()),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(score: f64, content: &str) -> SearchResult {
        SearchResult {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            content: content.to_string(),
            similarity_score: score,
            rank: 0,
        }
    }

    #[test]
    fn context_is_sorted_by_score_desc() {
        let chunks = vec![
            result(0.2, "low relevance text"),
            result(0.9, "high relevance text"),
            result(0.5, "medium relevance text"),
        ];
        let context = optimize_context(&chunks, 1000);
        let high = context.find("high relevance").unwrap();
        let medium = context.find("medium relevance").unwrap();
        let low = context.find("low relevance").unwrap();
        assert!(high < medium && medium < low);
        assert!(context.contains("[Source 1 | Score: 0.900"));
    }

    #[test]
    fn context_respects_token_budget() {
        let chunks = vec![
            result(0.9, &"a".repeat(400)),
            result(0.8, &"b".repeat(400)),
            result(0.7, &"c".repeat(400)),
        ];
        // 400 chars ≈ 100 tokens per chunk; budget fits two.
        let context = optimize_context(&chunks, 200);
        assert!(context.contains('a'));
        assert!(context.contains('b'));
        assert!(!context.contains('c'));
    }

    #[test]
    fn empty_chunks_give_empty_context() {
        assert_eq!(optimize_context(&[], 100), "");
    }
}
