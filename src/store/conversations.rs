//! Storage operations for conversations and chat messages.

use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use crate::error::Result;
use crate::store::models::{ChatMessageRow, Conversation, SourceRef};

#[derive(Clone)]
pub struct ConversationStore {
    pool: PgPool,
}

impl ConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create_conversation(
        &self,
        conn: &mut PgConnection,
        user_id: &str,
        conversation_id: Option<Uuid>,
        title: Option<&str>,
    ) -> Result<Conversation> {
        let row = sqlx::query_as::<_, Conversation>(
            r#"
            INSERT INTO conversations (id, user_id, title, metadata)
            VALUES ($1, $2, $3, '{}'::jsonb)
            RETURNING *
            "#,
        )
        .bind(conversation_id.unwrap_or_else(Uuid::new_v4))
        .bind(user_id)
        .bind(title)
        .fetch_one(&mut *conn)
        .await?;
        Ok(row)
    }

    pub async fn get_conversation(&self, conversation_id: Uuid) -> Result<Option<Conversation>> {
        let row = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Resolve a conversation for a user.
    ///
    /// An existing conversation owned by the user is reused. A provided id
    /// that does not exist is created with that id; anything else gets a
    /// fresh conversation.
    pub async fn get_or_create_conversation(
        &self,
        conn: &mut PgConnection,
        user_id: &str,
        conversation_id: Option<Uuid>,
    ) -> Result<Conversation> {
        if let Some(id) = conversation_id {
            let existing =
                sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
                    .bind(id)
                    .fetch_optional(&mut *conn)
                    .await?;
            match existing {
                Some(conv) if conv.user_id == user_id => return Ok(conv),
                Some(_) => {
                    // Owned by someone else: fall through to a fresh one
                    // rather than leaking the other user's thread.
                    return self.create_conversation(conn, user_id, None, None).await;
                }
                None => {
                    return self
                        .create_conversation(conn, user_id, Some(id), None)
                        .await;
                }
            }
        }
        self.create_conversation(conn, user_id, None, None).await
    }

    pub async fn add_message(
        &self,
        conn: &mut PgConnection,
        conversation_id: Uuid,
        message_id: Option<Uuid>,
        role: &str,
        content: &str,
        sources: &[SourceRef],
        metadata: serde_json::Value,
    ) -> Result<ChatMessageRow> {
        let row = sqlx::query_as::<_, ChatMessageRow>(
            r#"
            INSERT INTO chat_messages (id, conversation_id, role, content, sources, metadata)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(message_id.unwrap_or_else(Uuid::new_v4))
        .bind(conversation_id)
        .bind(role)
        .bind(content)
        .bind(serde_json::to_value(sources).unwrap_or_else(|_| serde_json::json!([])))
        .bind(metadata)
        .fetch_one(&mut *conn)
        .await?;

        sqlx::query("UPDATE conversations SET updated_at = NOW() WHERE id = $1")
            .bind(conversation_id)
            .execute(&mut *conn)
            .await?;

        Ok(row)
    }

    /// Messages in creation order, with offset pagination.
    pub async fn get_messages(
        &self,
        conversation_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ChatMessageRow>> {
        let rows = sqlx::query_as::<_, ChatMessageRow>(
            r#"
            SELECT * FROM chat_messages
            WHERE conversation_id = $1
            ORDER BY created_at ASC, id ASC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(conversation_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn delete_conversation(&self, conversation_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_user_conversations(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        let rows = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT * FROM conversations
            WHERE user_id = $1
            ORDER BY updated_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_title(&self, conversation_id: Uuid, title: &str) -> Result<()> {
        sqlx::query("UPDATE conversations SET title = $1, updated_at = NOW() WHERE id = $2")
            .bind(title)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
