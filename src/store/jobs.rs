//! Storage operations for ingestion jobs.
//!
//! Job counters are monotone: `processed` and `failed` only grow until the
//! job reaches a terminal state, and progress is derived from the counters
//! in the same statement so readers never observe a stale percentage.

use tracing::{info, instrument, warn};

use sqlx::PgPool;
use uuid::Uuid;

use crate::error::Result;
use crate::store::models::{IngestionJob, JobStatus};

#[derive(Clone)]
pub struct JobStore {
    pool: PgPool,
}

impl JobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_job(&self, user_id: &str, total_documents: i32) -> Result<IngestionJob> {
        let row = sqlx::query_as::<_, IngestionJob>(
            r#"
            INSERT INTO ingestion_jobs (id, user_id, status, total_documents)
            VALUES ($1, $2, 'queued', $3)
            RETURNING *
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(user_id)
        .bind(total_documents)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<IngestionJob>> {
        let row = sqlx::query_as::<_, IngestionJob>("SELECT * FROM ingestion_jobs WHERE id = $1")
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Flip a queued job to `processing`.
    pub async fn mark_processing(&self, job_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE ingestion_jobs SET status = 'processing' WHERE id = $1 AND status = 'queued'")
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record one successfully processed document.
    pub async fn increment_processed(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_jobs SET
                processed_documents = processed_documents + 1,
                progress_percent = COALESCE(
                    100.0 * (processed_documents + 1 + failed_documents)
                        / NULLIF(total_documents, 0),
                    0
                )
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Record one failed document and append its error.
    pub async fn increment_failed(&self, job_id: Uuid, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_jobs SET
                failed_documents = failed_documents + 1,
                errors = errors || to_jsonb($2::text),
                progress_percent = COALESCE(
                    100.0 * (processed_documents + failed_documents + 1)
                        / NULLIF(total_documents, 0),
                    0
                )
            WHERE id = $1 AND completed_at IS NULL
            "#,
        )
        .bind(job_id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Derive the terminal status from the counters and stamp completion.
    ///
    /// `completed` when everything succeeded, `partial` on a mix, `failed`
    /// when nothing made it. A job already cancelled stays cancelled.
    #[instrument(skip(self), err)]
    pub async fn complete_job(&self, job_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE ingestion_jobs SET
                status = CASE
                    WHEN failed_documents = 0 THEN 'completed'
                    WHEN processed_documents = 0 THEN 'failed'
                    ELSE 'partial'
                END,
                completed_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(job_id)
        .execute(&self.pool)
        .await?;
        info!(job_id = %job_id, "ingestion job completed");
        Ok(())
    }

    /// Cancel a job while it is still `queued` or `processing`.
    ///
    /// Returns `(success, message)`. In-flight documents run to completion;
    /// the processor checks the status before starting each document.
    pub async fn cancel_job(&self, job_id: Uuid, user_id: &str) -> Result<(bool, String)> {
        let Some(job) = self.get_job(job_id).await? else {
            return Ok((false, format!("Job {job_id} not found")));
        };

        let status = job.status();
        if !matches!(status, JobStatus::Queued | JobStatus::Processing) {
            return Ok((
                false,
                format!("Cannot cancel job in {} state", status.as_str()),
            ));
        }

        sqlx::query(
            r#"
            UPDATE ingestion_jobs SET
                status = 'cancelled',
                errors = errors || to_jsonb($2::text),
                completed_at = NOW()
            WHERE id = $1 AND status IN ('queued', 'processing')
            "#,
        )
        .bind(job_id)
        .bind(format!("Cancelled by user {user_id}"))
        .execute(&self.pool)
        .await?;

        warn!(job_id = %job_id, user_id, "ingestion job cancelled");
        Ok((true, format!("Successfully cancelled job {job_id}")))
    }
}
