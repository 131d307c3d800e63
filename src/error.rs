//! Error taxonomy shared across the engine.
//!
//! Components raise [`EngineError`] variants; the RPC edge classifies them
//! once into the coarse [`ErrorCategory`] set. Streaming chat additionally
//! maps LLM failures onto [`StreamErrorCode`] by keyword so clients can parse
//! the terminal error chunk programmatically.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Unified error type for all engine components.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Input failed shape/length/format validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A referenced entity does not exist.
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    /// The entity exists but belongs to another user.
    #[error("access denied: {0}")]
    PermissionDenied(String),

    /// Database failure.
    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    /// HTTP transport failure (scraping, embeddings, LLM).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The upstream returned a non-success HTTP status.
    #[error("http status {status} from {url}")]
    HttpStatus { status: u16, url: String },

    /// LLM call failed; message retains the upstream detail for keyword
    /// classification.
    #[error("llm error: {0}")]
    Llm(String),

    /// Embedding generation failed.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// Fetch adapter failure not attributable to a single HTTP response.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// All retry attempts were exhausted; wraps the final cause.
    #[error("retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<EngineError>,
    },

    /// Integrity failure (chunked-upload size or checksum mismatch).
    #[error("data loss: {0}")]
    DataLoss(String),

    /// The request deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// Invalid configuration detected at startup.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Coarse error categories surfaced at the RPC boundary.
///
/// The transport layer maps these onto its own status codes; the engine
/// classifies exactly once, here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    NotFound,
    PermissionDenied,
    InvalidArgument,
    DeadlineExceeded,
    ResourceExhausted,
    AlreadyExists,
    Unavailable,
    DataLoss,
    Internal,
}

impl ErrorCategory {
    /// Classify an engine error into its RPC category.
    ///
    /// Typed variants map directly; everything else falls back to keyword
    /// matching on the message, mirroring how upstream providers encode
    /// failure modes in free text.
    pub fn classify(err: &EngineError) -> Self {
        match err {
            EngineError::Validation(_) | EngineError::Config(_) => Self::InvalidArgument,
            EngineError::NotFound { .. } => Self::NotFound,
            EngineError::PermissionDenied(_) => Self::PermissionDenied,
            EngineError::DeadlineExceeded => Self::DeadlineExceeded,
            EngineError::DataLoss(_) => Self::DataLoss,
            EngineError::RetryExhausted { source, .. } => match Self::classify(source) {
                Self::Internal => Self::Unavailable,
                other => other,
            },
            EngineError::Storage(sqlx::Error::RowNotFound) => Self::NotFound,
            EngineError::Storage(sqlx::Error::PoolTimedOut) => Self::Unavailable,
            EngineError::Http(e) if e.is_timeout() => Self::DeadlineExceeded,
            EngineError::Http(e) if e.is_connect() => Self::Unavailable,
            EngineError::HttpStatus { status: 429, .. } => Self::ResourceExhausted,
            EngineError::HttpStatus { status, .. } if *status >= 500 => Self::Unavailable,
            other => Self::from_message(&other.to_string()),
        }
    }

    fn from_message(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("not found") || msg.contains("does not exist") {
            Self::NotFound
        } else if msg.contains("permission")
            || msg.contains("unauthorized")
            || msg.contains("access denied")
        {
            Self::PermissionDenied
        } else if msg.contains("invalid") || msg.contains("validation") {
            Self::InvalidArgument
        } else if msg.contains("timeout") || msg.contains("deadline") {
            Self::DeadlineExceeded
        } else if msg.contains("rate") || msg.contains("quota") || msg.contains("exhausted") {
            Self::ResourceExhausted
        } else if msg.contains("already exists") || msg.contains("duplicate") {
            Self::AlreadyExists
        } else if msg.contains("unavailable") || msg.contains("connection") {
            Self::Unavailable
        } else {
            Self::Internal
        }
    }
}

/// Structured error codes carried in terminal stream-error chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorCode {
    Internal,
    Timeout,
    RateLimited,
    ContextTooLong,
    ModelUnavailable,
    InvalidRequest,
}

impl StreamErrorCode {
    /// Wire representation, used as the `{CODE}` prefix of an error chunk.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Internal => "INTERNAL_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::RateLimited => "RATE_LIMITED",
            Self::ContextTooLong => "CONTEXT_TOO_LONG",
            Self::ModelUnavailable => "MODEL_UNAVAILABLE",
            Self::InvalidRequest => "INVALID_REQUEST",
        }
    }

    /// Classify an LLM failure message by keyword.
    pub fn classify(message: &str) -> Self {
        let msg = message.to_lowercase();
        if msg.contains("timeout") || msg.contains("deadline") {
            Self::Timeout
        } else if msg.contains("rate") || msg.contains("quota") || msg.contains("limit") {
            Self::RateLimited
        } else if msg.contains("context")
            && (msg.contains("long") || msg.contains("length") || msg.contains("token"))
        {
            Self::ContextTooLong
        } else if msg.contains("model")
            && (msg.contains("unavailable") || msg.contains("not found"))
        {
            Self::ModelUnavailable
        } else if msg.contains("invalid") || msg.contains("validation") {
            Self::InvalidRequest
        } else {
            Self::Internal
        }
    }
}

/// Format a stream error as `"{CODE}: {message}"` for the terminal chunk.
pub fn format_stream_error(code: StreamErrorCode, message: &str) -> String {
    format!("{}: {}", code.as_str(), message)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_variants_classify_directly() {
        let err = EngineError::Validation("bad user id".into());
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::InvalidArgument);

        let err = EngineError::NotFound {
            kind: "conversation",
            id: "abc".into(),
        };
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::NotFound);

        let err = EngineError::DataLoss("checksum mismatch".into());
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::DataLoss);
    }

    #[test]
    fn message_fallback_matches_keywords() {
        let err = EngineError::Llm("upstream connection refused".into());
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::Unavailable);

        let err = EngineError::Fetch("resource already exists".into());
        assert_eq!(ErrorCategory::classify(&err), ErrorCategory::AlreadyExists);
    }

    #[test]
    fn retry_exhaustion_inherits_cause_category() {
        let err = EngineError::RetryExhausted {
            attempts: 3,
            source: Box::new(EngineError::HttpStatus {
                status: 429,
                url: "http://x".into(),
            }),
        };
        assert_eq!(
            ErrorCategory::classify(&err),
            ErrorCategory::ResourceExhausted
        );
    }

    #[test]
    fn stream_codes_classify_by_keyword() {
        assert_eq!(
            StreamErrorCode::classify("request timeout after 120s"),
            StreamErrorCode::Timeout
        );
        assert_eq!(
            StreamErrorCode::classify("rate limit exceeded"),
            StreamErrorCode::RateLimited
        );
        assert_eq!(
            StreamErrorCode::classify("context length exceeds maximum tokens"),
            StreamErrorCode::ContextTooLong
        );
        assert_eq!(
            StreamErrorCode::classify("model gpt-x not found"),
            StreamErrorCode::ModelUnavailable
        );
        assert_eq!(
            StreamErrorCode::classify("invalid request body"),
            StreamErrorCode::InvalidRequest
        );
        assert_eq!(
            StreamErrorCode::classify("something exploded"),
            StreamErrorCode::Internal
        );
    }

    #[test]
    fn stream_error_formatting() {
        assert_eq!(
            format_stream_error(StreamErrorCode::Timeout, "deadline hit"),
            "TIMEOUT: deadline hit"
        );
    }
}
