//! Prompt assembly for a single question.
//!
//! The model sees two messages: a fixed system instruction and one user turn
//! holding the question, optional thread history, and the retrieved context
//! blocks tagged with their source.

use crate::completion::{ChatMessage, Role};
use crate::models::RetrievedDoc;

pub const SYSTEM_PROMPT: &str = "You are Reachy Mini, a helpful assistant for troubleshooting robots in a Discord server. \
Always respond in English. Be concise and actionable, ask for clarification when needed, and avoid fabricating facts. \
Prefer bulleted steps. If you use retrieved context, cite the source filenames or titles in parentheses. \
In the first message of a new thread, briefly introduce yourself as Reachy Mini and say you are here to help; \
also mention that you only respond when explicitly tagged with @reachy_mini. \
If the user's question is not clear, or if they are just saying 'hello', respond with a friendly message asking \
for more details about their robot issue. Don't make up any context.";

const NO_CONTEXT: &str = "(no context found)";

/// A prior message in the conversation thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEntry {
    pub message_id: u64,
    pub author_is_bot: bool,
    pub content: String,
}

/// Render thread history as `role: content` lines, skipping empty messages.
pub fn format_history(entries: &[HistoryEntry]) -> String {
    entries
        .iter()
        .filter(|e| !e.content.is_empty())
        .map(|e| {
            let role = if e.author_is_bot { Role::Assistant } else { Role::User };
            format!("{}: {}", role.as_str(), e.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Render retrieved chunks as source-tagged blocks.
pub fn format_context(docs: &[RetrievedDoc]) -> String {
    if docs.is_empty() {
        return NO_CONTEXT.to_string();
    }
    docs.iter()
        .map(|d| format!("[Source: {}]\n{}", d.label(), d.text))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Build the user turn from the question, history, and retrieved context.
pub fn build_user_prompt(user_text: &str, history: &str, docs: &[RetrievedDoc]) -> String {
    let mut prompt = format!("User message:\n{}\n\n", user_text);
    if !history.is_empty() {
        prompt.push_str(&format!("Thread history:\n{}\n\n", history));
    }
    prompt.push_str(&format!("Retrieved context:\n{}\n\n", format_context(docs)));
    prompt.push_str("Answer as Reachy Mini.");
    prompt
}

/// The full message list sent to the completion client.
pub fn build_messages(user_text: &str, history: &str, docs: &[RetrievedDoc]) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(build_user_prompt(user_text, history, docs)),
    ]
}
