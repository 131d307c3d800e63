//! Row types for the persistent entities.

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// An ingested document. Owns its chunks; deletion cascades.
#[derive(Clone, Debug, FromRow)]
pub struct Document {
    pub id: Uuid,
    pub user_id: String,
    pub title: String,
    pub content: String,
    pub document_type: String,
    pub source_url: Option<String>,
    pub metadata: serde_json::Value,
    pub is_global: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Fetch a string field from the metadata map.
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }
}

/// A chunk of a document's text with its embedding.
///
/// `embedding` is only absent in the narrow window between chunk insert and
/// the batch embedding write-back.
#[derive(Clone, Debug, FromRow)]
pub struct DocumentChunk {
    pub id: Uuid,
    pub document_id: Uuid,
    pub content: String,
    pub chunk_index: i32,
    pub embedding: Option<Vector>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Lifecycle states of an ingestion job.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Partial,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Terminal states permit no further mutation.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Partial | Self::Failed | Self::Cancelled
        )
    }
}

/// Durable record tracking an ingestion batch.
#[derive(Clone, Debug, FromRow)]
pub struct IngestionJob {
    pub id: Uuid,
    pub user_id: String,
    pub status: String,
    pub total_documents: i32,
    pub processed_documents: i32,
    pub failed_documents: i32,
    pub errors: serde_json::Value,
    pub progress_percent: f64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl IngestionJob {
    pub fn status(&self) -> JobStatus {
        JobStatus::parse(&self.status).unwrap_or(JobStatus::Queued)
    }

    /// The accumulated error strings, oldest first.
    pub fn error_list(&self) -> Vec<String> {
        self.errors
            .as_array()
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// A chat conversation. Owns its messages; deletion cascades.
#[derive(Clone, Debug, FromRow)]
pub struct Conversation {
    pub id: Uuid,
    pub user_id: String,
    pub title: Option<String>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A persisted chat message, append-only within its conversation.
#[derive(Clone, Debug, FromRow)]
pub struct ChatMessageRow {
    pub id: Uuid,
    pub conversation_id: Uuid,
    pub role: String,
    pub content: String,
    pub sources: serde_json::Value,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl ChatMessageRow {
    pub fn source_refs(&self) -> Vec<SourceRef> {
        serde_json::from_value(self.sources.clone()).unwrap_or_default()
    }
}

/// Long-term memory blob for a user; at most one row per user.
#[derive(Clone, Debug, FromRow)]
pub struct UserMemoryRow {
    pub user_id: String,
    pub memory: String,
    pub metadata: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Reference from a generated answer back to the chunk that justified it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    pub chunk_id: Uuid,
    pub document_id: Uuid,
    pub relevance_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_status_round_trips() {
        for status in [
            JobStatus::Queued,
            JobStatus::Processing,
            JobStatus::Completed,
            JobStatus::Partial,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ] {
            assert_eq!(JobStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(JobStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Processing.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Cancelled.is_terminal());
    }

    #[test]
    fn source_refs_survive_json() {
        let source = SourceRef {
            chunk_id: Uuid::new_v4(),
            document_id: Uuid::new_v4(),
            relevance_score: 0.87,
            content: Some("chunk text".into()),
        };
        let json = serde_json::to_value(vec![source.clone()]).unwrap();
        let parsed: Vec<SourceRef> = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, vec![source]);
    }
}
