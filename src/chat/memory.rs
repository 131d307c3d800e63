//! LLM-driven extraction of durable user facts.
//!
//! The extractor reads the last turns of a conversation and asks the model
//! for new facts the user stated about themselves, one per line. Two
//! sentinels control the outcome: `NO_UPDATE` (nothing new) and
//! `FORGET_ALL` (the user asked to be forgotten). Extracted lines are
//! merged set-wise with the existing memory and kept sorted.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::Result;
use crate::llm::{GenerationOptions, LlmClient, Message};

/// Window of recent messages handed to the extractor.
const RECENT_MESSAGE_WINDOW: usize = 10;

/// Lines containing any of these are hallucinated non-facts and dropped.
const UNCERTAINTY_KEYWORDS: &[&str] = &[
    "unknown",
    "unspecified",
    "unclear",
    "not mentioned",
    "not stated",
    "not provided",
    "not given",
    "uncertain",
    "no information",
    "no data",
    "not sure",
    "maybe",
    "possibly",
];

const EXTRACTION_PROMPT: &str = "\
You maintain a long-term memory of facts about the user.

Rules:
- Only extract facts from messages with role \"user\".
- Only extract facts the user directly stated about themselves.
- Output each new fact on its own line, prefixed with \"- \".
- If there is nothing new to remember, output exactly NO_UPDATE.
- If the user asked you to forget everything about them, output exactly FORGET_ALL.
- Never guess, never infer, never restate facts already in the current memory.";

/// Outcome of a memory extraction pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryUpdate {
    /// Delete the user's memory row.
    Forget,
    /// Replace the memory with this content.
    Set(String),
    /// Leave the memory untouched.
    NoChange,
}

/// Extracts and merges user facts after each exchange.
#[derive(Clone)]
pub struct MemoryExtractor {
    llm: Arc<dyn LlmClient>,
}

impl MemoryExtractor {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }

    /// Run one extraction pass over the tail of the conversation.
    ///
    /// An LLM failure never breaks the chat flow; it degrades to
    /// [`MemoryUpdate::NoChange`].
    pub async fn extract(
        &self,
        current_memory: Option<&str>,
        recent_messages: &[Message],
    ) -> Result<MemoryUpdate> {
        let window_start = recent_messages.len().saturating_sub(RECENT_MESSAGE_WINDOW);
        let window = &recent_messages[window_start..];

        let transcript = window
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");

        let user_prompt = format!(
            "Current memory:\n{}\n\nRecent conversation:\n{}\n\nNew facts:",
            current_memory.unwrap_or("(empty)"),
            transcript
        );

        let messages = vec![
            Message::system(EXTRACTION_PROMPT),
            Message::user(user_prompt),
        ];
        let options = GenerationOptions {
            temperature: Some(0.1),
            ..GenerationOptions::default()
        };

        let raw = match self.llm.generate(&messages, &options).await {
            Ok((text, _)) => text,
            Err(e) => {
                warn!("memory extraction failed, leaving memory unchanged: {e}");
                return Ok(MemoryUpdate::NoChange);
            }
        };

        Ok(postprocess(current_memory, &raw))
    }
}

/// Apply the sentinel and merge rules to a raw extractor output.
pub(crate) fn postprocess(current_memory: Option<&str>, raw: &str) -> MemoryUpdate {
    let cleaned = strip_code_fences(raw);
    let cleaned = cleaned.trim();

    if cleaned.contains("FORGET_ALL") {
        return MemoryUpdate::Forget;
    }
    if cleaned.contains("NO_UPDATE") || cleaned.chars().count() < 5 {
        return MemoryUpdate::NoChange;
    }

    let extracted: Vec<String> = cleaned
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .filter(|line| {
            let lower = line.to_lowercase();
            !UNCERTAINTY_KEYWORDS.iter().any(|kw| lower.contains(kw))
        })
        .map(str::to_string)
        .collect();

    if extracted.is_empty() {
        return MemoryUpdate::NoChange;
    }

    match current_memory {
        Some(existing) if !existing.trim().is_empty() => {
            let mut lines: BTreeSet<String> = existing
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect();
            let before = lines.len();
            lines.extend(extracted);
            if lines.len() == before {
                debug!("extracted facts were already known");
            }
            MemoryUpdate::Set(lines.into_iter().collect::<Vec<_>>().join("\n"))
        }
        _ => MemoryUpdate::Set(extracted.join("\n")),
    }
}

fn strip_code_fences(text: &str) -> String {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forget_sentinel_wins() {
        assert_eq!(postprocess(Some("- fact"), "FORGET_ALL"), MemoryUpdate::Forget);
    }

    #[test]
    fn no_update_and_short_outputs_leave_memory_alone() {
        assert_eq!(postprocess(None, "NO_UPDATE"), MemoryUpdate::NoChange);
        assert_eq!(postprocess(None, "ok"), MemoryUpdate::NoChange);
        assert_eq!(postprocess(None, "   "), MemoryUpdate::NoChange);
    }

    #[test]
    fn uncertainty_lines_are_dropped() {
        let raw = "- The user lives in Lisbon.\n- Their age is not mentioned.\n- Maybe they like tea.";
        match postprocess(None, raw) {
            MemoryUpdate::Set(memory) => {
                assert_eq!(memory, "- The user lives in Lisbon.");
            }
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn merge_is_a_sorted_union() {
        let current = "- b fact\n- a fact";
        let raw = "- c fact\n- a fact";
        match postprocess(Some(current), raw) {
            MemoryUpdate::Set(memory) => {
                assert_eq!(memory, "- a fact\n- b fact\n- c fact");
            }
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn code_fences_are_stripped() {
        let raw = "```\n- The user is a violinist.\n```";
        match postprocess(None, raw) {
            MemoryUpdate::Set(memory) => assert_eq!(memory, "- The user is a violinist."),
            other => panic!("expected Set, got {other:?}"),
        }
    }

    #[test]
    fn all_uncertain_output_is_no_change() {
        let raw = "- Location unknown.\n- Preferences unclear.";
        assert_eq!(postprocess(None, raw), MemoryUpdate::NoChange);
    }
}
