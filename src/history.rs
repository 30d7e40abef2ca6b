//! Conversion of a stored conversation into chat-completion messages

use crate::api::ChatMessage;
use crate::types::{ChatCompletionMessage, ContentPart, MessageContent, MessageRole};

/// Build the message list for the next model call.
///
/// The message whose id is `current_message_id` is the user turn being sent
/// now; when `current_parts` is non-empty it replaces that turn (its text plus
/// any images), and a single text part is sent as plain text. Every other turn,
/// and the current one when no parts are given, keeps its stored text followed
/// by a note naming its attachments.
pub fn build_llm_messages(
    history: &[ChatMessage],
    current_message_id: &str,
    current_parts: &[ContentPart],
) -> Vec<ChatCompletionMessage> {
    history
        .iter()
        .map(|message| {
            let role = message.role.unwrap_or(MessageRole::User);

            if message.id == current_message_id && !current_parts.is_empty() {
                return ChatCompletionMessage::new(role, current_content(current_parts));
            }

            let mut text = message.text.clone();
            if !message.attachments.is_empty() {
                let names: Vec<&str> = message
                    .attachments
                    .iter()
                    .map(|a| if a.name.is_empty() { "unnamed" } else { a.name.as_str() })
                    .collect();
                text.push_str("\n[Attachments] ");
                text.push_str(&names.join(", "));
            }
            ChatCompletionMessage::new(role, text)
        })
        .collect()
}

fn current_content(parts: &[ContentPart]) -> MessageContent {
    match parts {
        [ContentPart::Text { text }] => MessageContent::Text(text.clone()),
        _ => MessageContent::Parts(parts.to_vec()),
    }
}

/// Excerpt length used for extracted document text
pub const DEFAULT_EXCERPT_CHARS: usize = 4000;

/// Cut `text` to at most `max_chars` characters, appending a notice with the
/// original length when anything was removed.
pub fn truncate_with_notice(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars).collect();
    format!("{kept}\n\n...(truncated, original length about {total} characters)")
}
