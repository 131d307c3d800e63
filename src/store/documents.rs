//! Storage operations for documents and their chunks.
//!
//! Mutations used by the ingestion pipeline take an explicit connection so
//! the caller controls the per-document transaction scope; reads go through
//! the pool.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use sqlx::{PgConnection, PgPool};
use tracing::instrument;
use uuid::Uuid;

use crate::error::Result;
use crate::store::models::{Document, DocumentChunk};

/// Fields for a new document row.
#[derive(Clone, Debug)]
pub struct NewDocument {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub document_type: String,
    pub source_url: Option<String>,
    pub metadata: serde_json::Value,
    pub is_global: bool,
}

#[derive(Clone)]
pub struct DocumentStore {
    pool: PgPool,
}

impl DocumentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert_document(
        &self,
        conn: &mut PgConnection,
        doc: &NewDocument,
    ) -> Result<Document> {
        let row = sqlx::query_as::<_, Document>(
            r#"
            INSERT INTO documents
                (id, user_id, title, content, document_type, source_url, metadata, is_global)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(doc.id)
        .bind(&doc.user_id)
        .bind(&doc.title)
        .bind(&doc.content)
        .bind(&doc.document_type)
        .bind(&doc.source_url)
        .bind(&doc.metadata)
        .bind(doc.is_global)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn insert_chunk(
        &self,
        conn: &mut PgConnection,
        document_id: Uuid,
        chunk_index: i32,
        content: &str,
        metadata: &serde_json::Value,
    ) -> Result<DocumentChunk> {
        let row = sqlx::query_as::<_, DocumentChunk>(
            r#"
            INSERT INTO document_chunks (id, document_id, content, chunk_index, metadata)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(document_id)
        .bind(content)
        .bind(chunk_index)
        .bind(metadata)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    /// Write embeddings back to previously inserted chunk rows.
    pub async fn write_embeddings(
        &self,
        conn: &mut PgConnection,
        embeddings: &[(Uuid, Vector)],
    ) -> Result<()> {
        for (chunk_id, embedding) in embeddings {
            sqlx::query("UPDATE document_chunks SET embedding = $1 WHERE id = $2")
                .bind(embedding)
                .bind(chunk_id)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }

    pub async fn get_document(&self, document_id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE id = $1")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    pub async fn list_user_documents(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Document>> {
        let rows = sqlx::query_as::<_, Document>(
            r#"
            SELECT * FROM documents
            WHERE user_id = $1
              AND ($2::timestamptz IS NULL OR updated_at >= $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#,
        )
        .bind(user_id)
        .bind(since)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn count_user_documents(&self, user_id: &str) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }

    pub async fn get_chunks_for_document(&self, document_id: Uuid) -> Result<Vec<DocumentChunk>> {
        let rows = sqlx::query_as::<_, DocumentChunk>(
            "SELECT * FROM document_chunks WHERE document_id = $1 ORDER BY chunk_index",
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn chunk_count(&self, document_id: Uuid) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM document_chunks WHERE document_id = $1")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    /// Delete a document and its chunks.
    ///
    /// Returns `(deleted, chunks_deleted, embeddings_deleted)`. The cascade
    /// is enforced by the schema; counts are taken first so the caller can
    /// report them.
    #[instrument(skip(self), err)]
    pub async fn delete_document(&self, document_id: Uuid) -> Result<(bool, u64, u64)> {
        let mut tx = self.pool.begin().await?;

        let (chunks, embeddings): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*), COUNT(embedding)
            FROM document_chunks WHERE document_id = $1
            "#,
        )
        .bind(document_id)
        .fetch_one(&mut *tx)
        .await?;

        let result = sqlx::query("DELETE FROM documents WHERE id = $1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok((
            result.rows_affected() > 0,
            chunks as u64,
            embeddings as u64,
        ))
    }
}
