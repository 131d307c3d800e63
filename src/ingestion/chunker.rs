//! Overlap-preserving text chunker.
//!
//! Text is split on a paragraph separator and greedily packed into chunks of
//! at most `chunk_size` characters. When a chunk fills up, the next chunk is
//! seeded with the last `chunk_overlap` characters of the previous one so
//! retrieval never loses context at a boundary. Parts that alone exceed the
//! chunk size fall back to sentence packing.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::Result;
use crate::ingestion::validation::{
    MAX_CONTENT_LENGTH, validate_chunk_params, validate_content_length,
};

static SENTENCE_END_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+\s+").expect("hard-coded pattern is valid"));

/// A contiguous span of a document's text.
#[derive(Clone, Debug, PartialEq)]
pub struct TextChunk {
    pub content: String,
    /// Dense, 0-based position within the document.
    pub index: usize,
    pub start_char: usize,
    pub end_char: usize,
    pub metadata: HashMap<String, String>,
}

/// Greedy chunker with paragraph→sentence fallback and trailing overlap.
#[derive(Clone, Debug)]
pub struct TextChunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: String,
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn tail_chars(s: &str, n: usize) -> &str {
    let total = char_len(s);
    if total <= n {
        return s;
    }
    let skip = total - n;
    match s.char_indices().nth(skip) {
        Some((byte_idx, _)) => &s[byte_idx..],
        None => s,
    }
}

impl TextChunker {
    /// Create a chunker, validating the parameters.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunk_params(chunk_size, chunk_overlap)?;
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separator: "\n\n".to_string(),
        })
    }

    /// Override the primary split separator (default: paragraph break).
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.separator = separator.into();
        self
    }

    /// Split `text` into overlapping chunks with dense indices.
    pub fn chunk(
        &self,
        text: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<Vec<TextChunk>> {
        if text.is_empty() {
            return Ok(Vec::new());
        }
        validate_content_length(text, MAX_CONTENT_LENGTH)?;

        let parts: Vec<&str> = text
            .split(self.separator.as_str())
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        let parts = if parts.is_empty() { vec![text] } else { parts };

        let mut builder = ChunkBuilder::new(self.chunk_overlap, metadata);
        let sep_len = char_len(&self.separator);

        for part in parts {
            let part_len = char_len(part);
            if builder.current_len() + part_len + sep_len > self.chunk_size {
                if !builder.is_empty() {
                    builder.flush();
                }
                if part_len > self.chunk_size {
                    self.pack_sentences(part, &mut builder);
                } else {
                    builder.append(part, &self.separator);
                }
            } else {
                builder.append(part, &self.separator);
            }
        }
        builder.finish();

        Ok(builder.chunks)
    }

    /// Pack an oversized part sentence by sentence.
    fn pack_sentences(&self, part: &str, builder: &mut ChunkBuilder<'_>) {
        for sentence in split_sentences(part) {
            let pieces = if char_len(&sentence) > self.chunk_size {
                // A single run-on sentence bigger than the chunk: hard-split.
                hard_split(&sentence, self.chunk_size)
            } else {
                vec![sentence]
            };
            for piece in pieces {
                if !builder.is_empty()
                    && builder.current_len() + char_len(&piece) + 1 > self.chunk_size
                {
                    builder.flush();
                }
                builder.append(&piece, " ");
            }
        }
    }
}

/// Split text into sentences, keeping their terminators attached.
fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut last = 0;
    for m in SENTENCE_END_RE.find_iter(text) {
        let sentence = text[last..m.end()].trim();
        if !sentence.is_empty() {
            sentences.push(sentence.to_string());
        }
        last = m.end();
    }
    let rest = text[last..].trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

fn hard_split(text: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(max_chars)
        .map(|c| c.iter().collect())
        .collect()
}

/// Accumulates parts into chunks, carrying overlap and offsets.
struct ChunkBuilder<'m> {
    chunks: Vec<TextChunk>,
    current: String,
    /// Length of the overlap seed at the head of `current`; a buffer that
    /// never grew past its seed is dropped, not emitted.
    seed_len: usize,
    current_start: usize,
    overlap: usize,
    metadata: &'m HashMap<String, String>,
}

impl<'m> ChunkBuilder<'m> {
    fn new(overlap: usize, metadata: &'m HashMap<String, String>) -> Self {
        Self {
            chunks: Vec::new(),
            current: String::new(),
            seed_len: 0,
            current_start: 0,
            overlap,
            metadata,
        }
    }

    fn current_len(&self) -> usize {
        char_len(&self.current)
    }

    fn is_empty(&self) -> bool {
        self.current.is_empty()
    }

    fn append(&mut self, part: &str, separator: &str) {
        if self.current.is_empty() {
            self.current.push_str(part);
        } else {
            self.current.push_str(separator);
            self.current.push_str(part);
        }
    }

    /// Emit the current buffer and seed the next one with trailing overlap.
    fn flush(&mut self) {
        if self.current_len() <= self.seed_len {
            // Nothing beyond the carried overlap; already covered by the
            // previous chunk.
            self.current.clear();
            self.seed_len = 0;
            return;
        }
        let content = self.current.trim().to_string();
        if content.is_empty() {
            self.current.clear();
            self.seed_len = 0;
            return;
        }
        let content_len = char_len(&content);
        self.chunks.push(TextChunk {
            content: content.clone(),
            index: self.chunks.len(),
            start_char: self.current_start,
            end_char: self.current_start + content_len,
            metadata: self.metadata.clone(),
        });

        if self.overlap > 0 && content_len > self.overlap {
            let overlap_text = tail_chars(&content, self.overlap).to_string();
            self.current_start += content_len - self.overlap;
            self.seed_len = char_len(&overlap_text);
            self.current = overlap_text;
        } else {
            self.current_start += content_len;
            self.current.clear();
            self.seed_len = 0;
        }
    }

    /// Emit whatever remains beyond the carried overlap.
    fn finish(&mut self) {
        self.flush();
    }
}

/// Chunk text with the given parameters.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    chunk_overlap: usize,
    metadata: &HashMap<String, String>,
) -> Result<Vec<TextChunk>> {
    TextChunker::new(chunk_size, chunk_overlap)?.chunk(text, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn meta() -> HashMap<String, String> {
        HashMap::from([("title".to_string(), "doc".to_string())])
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        let chunks = chunk_text("", 100, 10, &meta()).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn short_text_is_one_chunk() {
        let chunks = chunk_text("Just a short paragraph.", 100, 10, &meta()).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].index, 0);
        assert_eq!(chunks[0].content, "Just a short paragraph.");
        assert_eq!(chunks[0].metadata["title"], "doc");
    }

    #[test]
    fn indices_are_dense_and_monotonic() {
        let text = (0..40)
            .map(|i| format!("Paragraph number {i} with a fair amount of text in it."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 120, 20, &meta()).unwrap();
        assert!(chunks.len() > 1);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn consecutive_chunks_share_overlap() {
        let text = (0..20)
            .map(|i| format!("Some sentence number {i} that fills space."))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_text(&text, 100, 30, &meta()).unwrap();
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let prev_tail: String = pair[0]
                .content
                .chars()
                .rev()
                .take(30)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
            assert!(
                pair[1].content.starts_with(prev_tail.trim_start()),
                "chunk {} does not carry the overlap of chunk {}",
                pair[1].index,
                pair[0].index
            );
        }
    }

    #[test]
    fn oversized_paragraph_falls_back_to_sentences() {
        let long_paragraph = (0..30)
            .map(|i| format!("Sentence number {i} keeps going on."))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = chunk_text(&long_paragraph, 120, 10, &meta()).unwrap();
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.content.chars().count() <= 120 + 10);
        }
    }

    #[test]
    fn rejects_oversize_input() {
        let huge = "a".repeat(MAX_CONTENT_LENGTH + 1);
        assert!(chunk_text(&huge, 512, 50, &meta()).is_err());
    }

    #[test]
    fn rejects_bad_params() {
        assert!(TextChunker::new(10, 0).is_err());
        assert!(TextChunker::new(100, 100).is_err());
    }

    proptest! {
        #[test]
        fn no_chunk_exceeds_size_plus_overlap(
            paragraphs in prop::collection::vec("[a-z ]{10,80}", 1..30),
            chunk_size in 60usize..400,
            overlap in 0usize..50,
        ) {
            let text = paragraphs.join("\n\n");
            let chunks = chunk_text(&text, chunk_size, overlap, &HashMap::new()).unwrap();
            for chunk in &chunks {
                prop_assert!(chunk.content.chars().count() <= chunk_size + overlap + 2);
            }
            for (i, chunk) in chunks.iter().enumerate() {
                prop_assert_eq!(chunk.index, i);
            }
        }
    }
}
