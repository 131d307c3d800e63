//! Micro-batched embedding for document ingestion.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use futures_util::stream;
use tracing::{debug, info};

use crate::embedding::provider::EmbeddingProvider;
use crate::error::Result;

/// Splits inputs into fixed-size micro-batches and embeds up to
/// `max_concurrent` of them in parallel, stitching results back in input
/// order.
#[derive(Clone)]
pub struct BatchEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_concurrent: usize,
}

impl BatchEmbedder {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            max_concurrent: max_concurrent.max(1),
        }
    }

    /// Embed all texts, returning vectors in input order plus elapsed time.
    pub async fn embed_all(&self, texts: &[String]) -> Result<(Vec<Vec<f32>>, Duration)> {
        let start = Instant::now();
        if texts.is_empty() {
            return Ok((Vec::new(), start.elapsed()));
        }

        let batches: Vec<Vec<String>> = texts
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let batch_count = batches.len();

        info!(
            texts = texts.len(),
            batches = batch_count,
            batch_size = self.batch_size,
            max_concurrent = self.max_concurrent,
            "embedding batch"
        );

        // `buffered` preserves input order while keeping up to
        // `max_concurrent` micro-batches in flight.
        let mut results = stream::iter(batches.into_iter().enumerate().map(|(idx, batch)| {
            let provider = Arc::clone(&self.provider);
            async move {
                let vectors = provider.embed(&batch).await?;
                debug!(batch = idx, size = batch.len(), "micro-batch embedded");
                Ok::<_, crate::error::EngineError>(vectors)
            }
        }))
        .buffered(self.max_concurrent);

        let mut all = Vec::with_capacity(texts.len());
        while let Some(result) = results.next().await {
            all.extend(result?);
        }

        let elapsed = start.elapsed();
        info!(
            embeddings = all.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "embedding batch complete"
        );
        Ok((all, elapsed))
    }

    pub fn dimensions(&self) -> usize {
        self.provider.dimensions()
    }
}
