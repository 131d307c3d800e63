//! Query-side embedding with instruction prefix and bounded caching.

use std::sync::Arc;

use moka::future::Cache;
use tracing::debug;

use crate::embedding::provider::EmbeddingProvider;
use crate::error::{EngineError, Result};

/// Embeds search queries, caching results by the raw query string.
///
/// Some embedding models want an instruction prepended to queries (but not
/// to passages); the configured instruction is applied before embedding
/// while the cache key stays the raw query.
#[derive(Clone)]
pub struct QueryEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    instruction: String,
    cache: Cache<String, Arc<Vec<f32>>>,
}

impl QueryEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        instruction: impl Into<String>,
        cache_capacity: u64,
    ) -> Self {
        Self {
            provider,
            instruction: instruction.into(),
            cache: Cache::new(cache_capacity),
        }
    }

    /// Embed a query, hitting the cache when possible.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(query).await {
            debug!(query = %truncate_for_log(query), "query embedding cache hit");
            return Ok(cached.as_ref().clone());
        }

        let prefixed = if self.instruction.is_empty() {
            query.to_string()
        } else {
            format!("{}{}", self.instruction, query)
        };

        let mut vectors = self.provider.embed(&[prefixed]).await?;
        let vector = vectors
            .pop()
            .ok_or_else(|| EngineError::Embedding("provider returned no vectors".into()))?;

        self.cache
            .insert(query.to_string(), Arc::new(vector.clone()))
            .await;
        Ok(vector)
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }

    /// Number of cached queries (approximate under concurrency).
    pub fn cache_len(&self) -> u64 {
        self.cache.entry_count()
    }
}

fn truncate_for_log(query: &str) -> String {
    query.chars().take(50).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::provider::MockEmbeddingProvider;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider {
        inner: MockEmbeddingProvider,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.embed(texts).await
        }

        fn dimensions(&self) -> usize {
            self.inner.dimensions()
        }
    }

    #[tokio::test]
    async fn repeated_queries_hit_the_cache() {
        let provider = Arc::new(CountingProvider {
            inner: MockEmbeddingProvider::new(32),
            calls: AtomicUsize::new(0),
        });
        let embedder = QueryEmbedder::new(provider.clone(), "", 100);

        let first = embedder.embed_query("what is rust").await.unwrap();
        let second = embedder.embed_query("what is rust").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn instruction_changes_the_embedded_text() {
        let provider = Arc::new(MockEmbeddingProvider::new(64));
        let plain = QueryEmbedder::new(provider.clone(), "", 10);
        let instructed = QueryEmbedder::new(provider, "query: ", 10);

        let a = plain.embed_query("hello").await.unwrap();
        let b = instructed.embed_query("hello").await.unwrap();
        assert_ne!(a, b);
    }
}
