//! Builds the ordered prompt sent to the model from a chat's config, its
//! stored history and the new message.

use groqbot_types::chat::ChatConfig;
use groqbot_types::history::{HistoryEntry, PromptMessage};

/// Rough characters-per-token ratio used to keep prompts inside the model's
/// context window without a tokenizer.
const CHARS_PER_TOKEN: usize = 4;

/// Fixed per-message overhead of the chat format, in tokens.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub messages: Vec<PromptMessage>,
    /// History entries left out to fit the context window.
    pub dropped: usize,
}

pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN) + MESSAGE_OVERHEAD_TOKENS
}

/// `[system] + history + [new message]`, dropping the oldest history first
/// when the estimate exceeds `context_window - max_tokens`. The system prompt
/// and the new message are always kept.
pub fn assemble(config: &ChatConfig, history: &[HistoryEntry], new_message: &str) -> Prompt {
    let model = config.model_info();
    let budget = (model.context_window as usize).saturating_sub(config.max_tokens as usize);

    let fixed = estimate_tokens(&config.system_prompt) + estimate_tokens(new_message);
    let mut used: usize = fixed + history.iter().map(|e| estimate_tokens(&e.content)).sum::<usize>();

    let mut start = 0;
    while used > budget && start < history.len() {
        used -= estimate_tokens(&history[start].content);
        start += 1;
    }

    let mut messages = Vec::with_capacity(history.len() - start + 2);
    messages.push(PromptMessage::system(config.system_prompt.clone()));
    messages.extend(history[start..].iter().map(PromptMessage::from));
    messages.push(PromptMessage::user(new_message));

    Prompt {
        model: config.model.clone(),
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        messages,
        dropped: start,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use groqbot_types::history::Role;

    fn entry(i: i64, content: &str) -> HistoryEntry {
        HistoryEntry {
            id: i,
            chat_id: 1,
            role: if i % 2 == 0 { Role::User } else { Role::Assistant },
            content: content.to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn system_then_history_then_new_message() {
        let config = ChatConfig::default_for(1, "sys");
        let history = vec![entry(0, "hi"), entry(1, "hello")];
        let prompt = assemble(&config, &history, "alice: how are you?");

        assert_eq!(prompt.model, "llama3-70b-8192");
        assert_eq!(prompt.max_tokens, 3000);
        assert_eq!(prompt.dropped, 0);
        let roles: Vec<_> = prompt.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, [Role::System, Role::User, Role::Assistant, Role::User]);
        assert_eq!(prompt.messages[3].content, "alice: how are you?");
    }

    #[test]
    fn oversized_history_drops_oldest_first() {
        let mut config = ChatConfig::default_for(1, "sys");
        // 8192 context - 8000 completion leaves ~190 tokens of prompt.
        config.max_tokens = 8000;
        let long = "x".repeat(400); // ~104 tokens each
        let history: Vec<_> = (0..5).map(|i| entry(i, &format!("{i}{long}"))).collect();

        let prompt = assemble(&config, &history, "newest");
        assert_eq!(prompt.dropped, 4);
        assert_eq!(prompt.messages.len(), 3);
        assert!(prompt.messages[1].content.starts_with('4'));
        assert_eq!(prompt.messages.last().unwrap().content, "newest");
    }

    #[test]
    fn new_message_survives_even_when_alone_too_big() {
        let mut config = ChatConfig::default_for(1, "sys");
        config.max_tokens = 8192;
        let history = vec![entry(0, "old")];
        let huge = "y".repeat(10_000);
        let prompt = assemble(&config, &history, &huge);
        assert_eq!(prompt.dropped, 1);
        assert_eq!(prompt.messages.len(), 2);
        assert_eq!(prompt.messages[1].content, huge);
    }
}
