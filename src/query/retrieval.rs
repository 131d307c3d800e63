//! Hybrid retrieval over the store.
//!
//! The `hybrid_search` SQL function owns the fusion of vector similarity and
//! keyword rank; this module embeds the query, invokes it, and normalizes
//! the rows. A pure-vector path exists for diagnostics and health checks.

use async_trait::async_trait;
use pgvector::Vector;
use sqlx::{FromRow, PgPool};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::embedding::QueryEmbedder;
use crate::error::Result;

/// A retrieved chunk with its fused relevance score and 1-based rank.
#[derive(Clone, Debug, FromRow)]
pub struct SearchResult {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub similarity_score: f64,
    pub rank: i64,
}

/// Retrieval seam used by the query pipeline; lets tests run the pipeline
/// against canned results.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        document_id: Option<Uuid>,
    ) -> Result<Vec<SearchResult>>;
}

/// Store-backed retriever combining vector and keyword search.
#[derive(Clone)]
pub struct HybridSearchEngine {
    pool: PgPool,
    embedder: QueryEmbedder,
    vector_weight: f32,
    keyword_weight: f32,
}

impl HybridSearchEngine {
    pub fn new(
        pool: PgPool,
        embedder: QueryEmbedder,
        vector_weight: f32,
        keyword_weight: f32,
    ) -> Self {
        Self {
            pool,
            embedder,
            vector_weight,
            keyword_weight,
        }
    }

    /// Pure cosine search joined against document ownership, ties broken by
    /// chunk id.
    pub async fn vector_search_only(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let embedding = Vector::from(self.embedder.embed_query(query).await?);

        let rows = sqlx::query_as::<_, SearchResult>(
            r#"
            SELECT
                c.id AS chunk_id,
                c.document_id,
                c.content,
                1 - (c.embedding <=> $1) AS similarity_score,
                ROW_NUMBER() OVER (ORDER BY c.embedding <=> $1, c.id) AS rank
            FROM document_chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE d.user_id = $2 AND c.embedding IS NOT NULL
            ORDER BY c.embedding <=> $1, c.id
            LIMIT $3
            "#,
        )
        .bind(&embedding)
        .bind(user_id)
        .bind(top_k as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl Retriever for HybridSearchEngine {
    #[instrument(skip(self, query))]
    async fn search(
        &self,
        query: &str,
        user_id: &str,
        top_k: usize,
        document_id: Option<Uuid>,
    ) -> Result<Vec<SearchResult>> {
        let embedding = Vector::from(self.embedder.embed_query(query).await?);

        let mut rows = sqlx::query_as::<_, SearchResult>(
            "SELECT * FROM hybrid_search($1, $2, $3, $4, $5, $6)",
        )
        .bind(&embedding)
        .bind(query)
        .bind(user_id)
        .bind(top_k as i32)
        .bind(self.vector_weight as f64)
        .bind(self.keyword_weight as f64)
        .fetch_all(&self.pool)
        .await?;

        // The stored function already clamps, but upstream schema drift must
        // never leak an out-of-range score.
        for row in &mut rows {
            row.similarity_score = row.similarity_score.clamp(0.0, 1.0);
        }

        if let Some(document_id) = document_id {
            rows.retain(|r| r.document_id == document_id);
        }

        info!(
            user_id,
            results = rows.len(),
            query = %query.chars().take(50).collect::<String>(),
            "hybrid search"
        );
        Ok(rows)
    }
}
