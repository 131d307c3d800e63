//! Deterministic system-prompt assembly.
//!
//! The message list is always `[system, …history, user-query]`. The system
//! message carries, in priority order: the identity clause, the user's
//! long-term memory, the retrieved knowledge base, and the answering rules.

use crate::llm::Message;

/// Default identity clause. Deployments override it through configuration,
/// never by editing prompt assembly.
pub const IDENTITY: &str = "You are a personal AI assistant with direct access to the user's \
long-term memory and their private knowledge base. Answer accurately from what you are given.";

const ANSWERING_RULES: &str = "\
ANSWERING RULES:
- For personal facts about the user, prefer the USER MEMORY section.
- For factual questions, prefer the KNOWLEDGE BASE section.
- Do not invent information that appears in neither section.
- If the memory and the knowledge base conflict about a personal fact, the memory wins.
- Never preface an answer with \"according to memory\" or similar phrasing.";

/// Build the full message list for a generation call.
///
/// History is passed through verbatim; it must not include the user message
/// being answered, which is appended last.
pub fn build_messages(
    identity: &str,
    query: &str,
    context_text: &str,
    history: &[Message],
    user_memory: Option<&str>,
) -> Vec<Message> {
    let memory_section = match user_memory {
        Some(memory) if !memory.trim().is_empty() => memory.trim(),
        _ => "None provided.",
    };
    let knowledge_section = if context_text.trim().is_empty() {
        "No external documents provided."
    } else {
        context_text.trim()
    };

    let system = format!(
        "{identity}\n\n\
         USER MEMORY (HIGHEST PRIORITY):\n{memory_section}\n\n\
         KNOWLEDGE BASE (DOCUMENTS):\n{knowledge_section}\n\n\
         {ANSWERING_RULES}"
    );

    let mut messages = Vec::with_capacity(history.len() + 2);
    messages.push(Message::system(system));
    messages.extend(history.iter().cloned());
    messages.push(Message::user(query));
    messages
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_order_is_fixed() {
        let messages = build_messages(
            IDENTITY,
            "what's my name?",
            "[Source 1 | Score: 0.9 | Doc: d]\ntext",
            &[],
            Some("- The user's name is Sam."),
        );
        assert_eq!(messages.len(), 2);
        let system = &messages[0].content;
        let memory_pos = system.find("USER MEMORY (HIGHEST PRIORITY)").unwrap();
        let kb_pos = system.find("KNOWLEDGE BASE (DOCUMENTS)").unwrap();
        let rules_pos = system.find("ANSWERING RULES").unwrap();
        assert!(memory_pos < kb_pos && kb_pos < rules_pos);
        assert!(system.contains("The user's name is Sam."));
    }

    #[test]
    fn empty_sections_get_placeholders() {
        let messages = build_messages(IDENTITY, "q", "", &[], None);
        let system = &messages[0].content;
        assert!(system.contains("None provided."));
        assert!(system.contains("No external documents provided."));
    }

    #[test]
    fn history_passes_through_verbatim() {
        let history = vec![Message::user("earlier question"), Message::assistant("earlier answer")];
        let messages = build_messages(IDENTITY, "new question", "", &history, None);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "earlier question");
        assert_eq!(messages[2].content, "earlier answer");
        assert_eq!(messages[3].role, Message::USER);
        assert_eq!(messages[3].content, "new question");
    }

    #[test]
    fn deterministic_for_same_inputs() {
        let a = build_messages(IDENTITY, "q", "ctx", &[], Some("m"));
        let b = build_messages(IDENTITY, "q", "ctx", &[], Some("m"));
        assert_eq!(a, b);
    }
}
