//! The ingestion pipeline: validate → clean → chunk → embed → persist.
//!
//! Documents within a job are processed sequentially, each inside its own
//! transaction. A failing document rolls back alone and bumps the job's
//! failure counter; it never aborts the job. Cancellation is cooperative:
//! the job status is re-read before each document, and in-flight documents
//! run to completion.

use std::collections::HashMap;

use pgvector::Vector;
use sqlx::PgPool;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::IngestionConfig;
use crate::embedding::BatchEmbedder;
use crate::error::{EngineError, Result};
use crate::ingestion::chunker::chunk_text;
use crate::ingestion::cleaning::{CleaningStrategy, DocumentType, clean_with_strategy};
use crate::ingestion::validation::{
    sanitize_metadata, validate_content_length, validate_document_title, validate_user_id,
};
use crate::store::models::JobStatus;
use crate::store::{DocumentStore, JobStore, NewDocument};

/// Inputs cleaned on a blocking thread past this size; regex passes over
/// megabyte documents would otherwise stall the scheduler.
const OFFLOAD_CLEAN_THRESHOLD: usize = 64 * 1024;

/// A document queued for ingestion.
#[derive(Clone, Debug)]
pub struct SourceDocument {
    pub id: Option<Uuid>,
    pub title: Option<String>,
    pub content: String,
    pub document_type: DocumentType,
    pub source_url: Option<String>,
    pub metadata: HashMap<String, String>,
}

/// Per-request overrides for the ingestion defaults.
#[derive(Clone, Debug, Default)]
pub struct IngestionOverrides {
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub auto_clean: Option<bool>,
}

/// Runs documents through the pipeline and tracks job progress.
#[derive(Clone)]
pub struct DocumentProcessor {
    pool: PgPool,
    documents: DocumentStore,
    jobs: JobStore,
    embedder: BatchEmbedder,
    config: IngestionConfig,
}

impl DocumentProcessor {
    pub fn new(
        pool: PgPool,
        documents: DocumentStore,
        jobs: JobStore,
        embedder: BatchEmbedder,
        config: IngestionConfig,
    ) -> Self {
        Self {
            pool,
            documents,
            jobs,
            embedder,
            config,
        }
    }

    /// Ingest a batch of documents under one job. Returns the job id.
    #[instrument(skip(self, documents, overrides), fields(docs = documents.len()))]
    pub async fn process_batch(
        &self,
        user_id: &str,
        documents: Vec<SourceDocument>,
        overrides: Option<&IngestionOverrides>,
        is_global: bool,
    ) -> Result<Uuid> {
        let job = self.jobs.create_job(user_id, documents.len() as i32).await?;
        self.jobs.mark_processing(job.id).await?;

        for document in documents {
            // Cooperative cancellation: nothing further is dequeued once the
            // job is cancelled, but the current document always finishes.
            match self.jobs.get_job(job.id).await? {
                Some(current) if current.status() == JobStatus::Cancelled => {
                    info!(job_id = %job.id, "job cancelled, stopping batch");
                    break;
                }
                _ => {}
            }

            let title = document.title.clone().unwrap_or_default();
            if let Err(e) = self
                .process_document(user_id, document, overrides, Some(job.id), is_global)
                .await
            {
                error!(job_id = %job.id, title, error = %e, "document failed, continuing batch");
            }
        }

        self.jobs.complete_job(job.id).await?;
        Ok(job.id)
    }

    /// Process a single document end to end.
    ///
    /// On success returns the document id and its chunk count; job counters
    /// are updated either way when a job id is given.
    pub async fn process_document(
        &self,
        user_id: &str,
        document: SourceDocument,
        overrides: Option<&IngestionOverrides>,
        job_id: Option<Uuid>,
        is_global: bool,
    ) -> Result<(Uuid, usize)> {
        match self
            .run_pipeline(user_id, document, overrides, job_id, is_global)
            .await
        {
            Ok(outcome) => {
                if let Some(job_id) = job_id {
                    self.jobs.increment_processed(job_id).await?;
                }
                Ok(outcome)
            }
            Err(e) => {
                if let Some(job_id) = job_id {
                    self.jobs.increment_failed(job_id, &e.to_string()).await?;
                }
                Err(e)
            }
        }
    }

    async fn run_pipeline(
        &self,
        user_id: &str,
        document: SourceDocument,
        overrides: Option<&IngestionOverrides>,
        job_id: Option<Uuid>,
        is_global: bool,
    ) -> Result<(Uuid, usize)> {
        validate_user_id(user_id)?;
        if document.content.is_empty() {
            return Err(EngineError::Validation(
                "document content cannot be empty".into(),
            ));
        }

        let title = match &document.title {
            Some(t) if !t.trim().is_empty() => match validate_document_title(t) {
                Ok(title) => title,
                Err(e) => {
                    warn!(error = %e, "title validation failed, using 'Untitled'");
                    "Untitled".to_string()
                }
            },
            _ => "Untitled".to_string(),
        };

        validate_content_length(&document.content, self.config.max_content_length)?;

        info!(
            user_id,
            %title,
            chars = document.content.len(),
            "processing document"
        );

        let chunk_size = overrides
            .and_then(|o| o.chunk_size)
            .unwrap_or(self.config.chunk_size);
        let chunk_overlap = overrides
            .and_then(|o| o.chunk_overlap)
            .unwrap_or(self.config.chunk_overlap);
        let auto_clean = overrides
            .and_then(|o| o.auto_clean)
            .unwrap_or(self.config.auto_clean);

        let content = if auto_clean {
            let doc_type = document.document_type;
            let raw = document.content.clone();
            let (cleaned, metrics) = if raw.len() > OFFLOAD_CLEAN_THRESHOLD {
                tokio::task::spawn_blocking(move || {
                    clean_with_strategy(&raw, doc_type, CleaningStrategy::Standard)
                })
                .await
                .map_err(|e| EngineError::Fetch(format!("cleaning task panicked: {e}")))?
            } else {
                clean_with_strategy(&raw, doc_type, CleaningStrategy::Standard)
            };
            info!(
                chars_removed = metrics.chars_removed,
                reduction_percent = %format!("{:.1}", metrics.reduction_percent()),
                html_tags_removed = metrics.html_tags_removed,
                "cleaned document"
            );
            cleaned
        } else {
            document.content.clone()
        };

        if content.trim().is_empty() {
            return Err(EngineError::Validation(
                "document content empty after cleaning".into(),
            ));
        }

        let document_id = document.id.unwrap_or_else(Uuid::new_v4);

        // Stash the job id so status lookups by resource id can find it.
        let mut metadata = sanitize_metadata(&document.metadata);
        if let Some(job_id) = job_id {
            metadata.insert("job_id".to_string(), job_id.to_string());
        }

        let chunk_metadata = HashMap::from([
            ("document_id".to_string(), document_id.to_string()),
            ("title".to_string(), title.clone()),
        ]);
        let chunks = chunk_text(&content, chunk_size, chunk_overlap, &chunk_metadata)?;
        info!(document_id = %document_id, chunks = chunks.len(), "chunked document");

        let chunk_texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let (embeddings, elapsed) = self.embedder.embed_all(&chunk_texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(EngineError::Embedding(format!(
                "embedding count mismatch: {} chunks, {} vectors",
                chunks.len(),
                embeddings.len()
            )));
        }
        info!(
            embeddings = embeddings.len(),
            elapsed_ms = elapsed.as_millis() as u64,
            "generated embeddings"
        );

        // One transaction per document: a failure from here on rolls back
        // the document and all of its chunks together.
        let mut tx = self.pool.begin().await?;

        let new_doc = NewDocument {
            id: document_id,
            user_id: user_id.to_string(),
            title: title.clone(),
            content: content.clone(),
            document_type: document.document_type.as_str().to_string(),
            source_url: document.source_url.clone(),
            metadata: serde_json::to_value(&metadata)
                .unwrap_or_else(|_| serde_json::json!({})),
            is_global,
        };
        let db_doc = self.documents.insert_document(&mut tx, &new_doc).await?;

        let mut vector_writes = Vec::with_capacity(chunks.len());
        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            let row = self
                .documents
                .insert_chunk(
                    &mut tx,
                    db_doc.id,
                    chunk.index as i32,
                    &chunk.content,
                    &serde_json::to_value(&chunk.metadata)
                        .unwrap_or_else(|_| serde_json::json!({})),
                )
                .await?;
            vector_writes.push((row.id, Vector::from(embedding)));
        }
        self.documents
            .write_embeddings(&mut tx, &vector_writes)
            .await?;

        tx.commit().await?;

        info!(
            document_id = %db_doc.id,
            chunks = vector_writes.len(),
            "document persisted"
        );
        Ok((db_doc.id, vector_writes.len()))
    }
}
