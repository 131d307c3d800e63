//! Storage for the per-user long-term memory blob.

use sqlx::PgPool;

use crate::error::Result;

#[derive(Clone)]
pub struct MemoryStore {
    pool: PgPool,
}

impl MemoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn get_memory(&self, user_id: &str) -> Result<Option<String>> {
        let memory: Option<String> =
            sqlx::query_scalar("SELECT memory FROM user_memories WHERE user_id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(memory.filter(|m| !m.is_empty()))
    }

    pub async fn upsert_memory(&self, user_id: &str, memory: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO user_memories (user_id, memory)
            VALUES ($1, $2)
            ON CONFLICT (user_id) DO UPDATE SET
                memory = EXCLUDED.memory,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(memory)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn delete_memory(&self, user_id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM user_memories WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
