use serde::{Deserialize, Serialize};

/// Point-in-time usage figures, logged by the maintenance task and printed by
/// `groqbot status`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UsageSnapshot {
    /// Chats that have a stored config row.
    pub total_chats: i64,
    pub enabled_chats: i64,
    /// History rows currently stored across all chats.
    pub stored_messages: i64,
    /// Conversational messages answered since the process started.
    pub messages_processed: u64,
    pub chat_models: Vec<ChatModel>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ChatModel {
    pub chat_id: i64,
    pub model: String,
}

impl UsageSnapshot {
    /// `"chat 1: llama3-70b-8192, chat 2: gemma2-9b-it"`
    pub fn chat_models_line(&self) -> String {
        self.chat_models
            .iter()
            .map(|c| format!("chat {}: {}", c.chat_id, c.model))
            .collect::<Vec<_>>()
            .join(", ")
    }
}
