//! Input validation for the ingestion pipeline.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use url::Url;

use crate::error::{EngineError, Result};

/// Maximum content length accepted anywhere in the pipeline (10 MB).
pub const MAX_CONTENT_LENGTH: usize = 10_000_000;
/// Maximum document title length before truncation.
pub const MAX_TITLE_LENGTH: usize = 500;
/// Maximum length of a single metadata value.
pub const MAX_METADATA_VALUE_LENGTH: usize = 1000;

static USER_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("hard-coded pattern is valid"));

/// Validate and normalize a URL.
///
/// A missing scheme defaults to `https://`. Only `http` and `https` are
/// accepted, and a host must be present.
pub fn validate_url(url: &str) -> Result<String> {
    let trimmed = url.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(
            "URL must be a non-empty string".into(),
        ));
    }

    let candidate = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_string()
    } else {
        format!("https://{trimmed}")
    };

    let parsed = Url::parse(&candidate)
        .map_err(|e| EngineError::Validation(format!("invalid URL '{trimmed}': {e}")))?;

    if parsed.host_str().is_none() {
        return Err(EngineError::Validation(format!(
            "invalid URL: missing domain - {candidate}"
        )));
    }
    match parsed.scheme() {
        "http" | "https" => Ok(candidate),
        other => Err(EngineError::Validation(format!(
            "invalid URL scheme: {other}"
        ))),
    }
}

/// Reject content over `max_length` characters.
pub fn validate_content_length(content: &str, max_length: usize) -> Result<()> {
    let len = content.chars().count();
    if len > max_length {
        return Err(EngineError::Validation(format!(
            "content too large: {len} chars (max: {max_length})"
        )));
    }
    Ok(())
}

/// Validate chunking parameters: `50 <= size <= 10_000`, `0 <= overlap < size`.
pub fn validate_chunk_params(chunk_size: usize, chunk_overlap: usize) -> Result<()> {
    if chunk_size < 50 {
        return Err(EngineError::Validation(format!(
            "chunk size too small: {chunk_size} (min: 50)"
        )));
    }
    if chunk_size > 10_000 {
        return Err(EngineError::Validation(format!(
            "chunk size too large: {chunk_size} (max: 10000)"
        )));
    }
    if chunk_overlap >= chunk_size {
        return Err(EngineError::Validation(format!(
            "chunk overlap ({chunk_overlap}) must be less than chunk size ({chunk_size})"
        )));
    }
    Ok(())
}

/// Validate and sanitize a document title.
///
/// Over-long titles are truncated at the last whitespace before the limit
/// with a `…` appended.
pub fn validate_document_title(title: &str) -> Result<String> {
    let trimmed = title.trim();
    if trimmed.is_empty() {
        return Err(EngineError::Validation(
            "title cannot be empty or whitespace only".into(),
        ));
    }

    if trimmed.chars().count() <= MAX_TITLE_LENGTH {
        return Ok(trimmed.to_string());
    }

    let head: String = trimmed.chars().take(MAX_TITLE_LENGTH).collect();
    let cut = head.rfind(char::is_whitespace).unwrap_or(head.len());
    let mut out = head[..cut].trim_end().to_string();
    out.push('…');
    Ok(out)
}

/// Keep string keys, truncate values at 1,000 chars, drop empty keys.
pub fn sanitize_metadata(metadata: &HashMap<String, String>) -> HashMap<String, String> {
    metadata
        .iter()
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| {
            let truncated: String = value.chars().take(MAX_METADATA_VALUE_LENGTH).collect();
            (key.clone(), truncated)
        })
        .collect()
}

/// Validate a user id: non-empty, at most 255 chars, `[A-Za-z0-9_-]+`.
pub fn validate_user_id(user_id: &str) -> Result<()> {
    if user_id.is_empty() {
        return Err(EngineError::Validation(
            "user ID must be a non-empty string".into(),
        ));
    }
    if user_id.len() > 255 {
        return Err(EngineError::Validation(format!(
            "user ID too long: {} (max: 255)",
            user_id.len()
        )));
    }
    if !USER_ID_RE.is_match(user_id) {
        return Err(EngineError::Validation(
            "user ID must contain only alphanumeric characters, hyphens, and underscores".into(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_scheme_is_prepended() {
        assert_eq!(
            validate_url("example.com/docs").unwrap(),
            "https://example.com/docs"
        );
        assert_eq!(
            validate_url("  http://example.com  ").unwrap(),
            "http://example.com"
        );
    }

    #[test]
    fn url_rejects_bad_schemes_and_missing_hosts() {
        assert!(validate_url("ftp://example.com").is_err());
        assert!(validate_url("").is_err());
        assert!(validate_url("https://").is_err());
    }

    #[test]
    fn chunk_param_bounds() {
        assert!(validate_chunk_params(512, 50).is_ok());
        assert!(validate_chunk_params(49, 0).is_err());
        assert!(validate_chunk_params(10_001, 0).is_err());
        assert!(validate_chunk_params(100, 100).is_err());
        assert!(validate_chunk_params(100, 99).is_ok());
    }

    #[test]
    fn title_truncates_at_word_boundary() {
        let long = "word ".repeat(200);
        let title = validate_document_title(&long).unwrap();
        assert!(title.chars().count() <= MAX_TITLE_LENGTH + 1);
        assert!(title.ends_with('…'));
        assert!(!title.trim_end_matches('…').ends_with(char::is_whitespace));

        assert!(validate_document_title("   ").is_err());
        assert_eq!(validate_document_title("  ok  ").unwrap(), "ok");
    }

    #[test]
    fn metadata_is_sanitized() {
        let mut meta = HashMap::new();
        meta.insert("key".to_string(), "v".repeat(2000));
        meta.insert(String::new(), "dropped".to_string());
        let clean = sanitize_metadata(&meta);
        assert_eq!(clean.len(), 1);
        assert_eq!(clean["key"].chars().count(), MAX_METADATA_VALUE_LENGTH);
    }

    #[test]
    fn user_id_format() {
        assert!(validate_user_id("user-1_A").is_ok());
        assert!(validate_user_id("").is_err());
        assert!(validate_user_id("user with spaces").is_err());
        assert!(validate_user_id(&"a".repeat(256)).is_err());
    }
}
