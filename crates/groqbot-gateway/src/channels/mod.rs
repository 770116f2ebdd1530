//! Chat platform boundary: the events the gateway consumes and the calls it
//! makes back into the platform.

pub mod telegram;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Inbound chat event, already stripped of platform specifics.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub chat_kind: ChatKind,
    pub message_id: i64,
    pub sender: Sender,
    pub content: EventContent,
    /// The message replies to one of the bot's own messages.
    pub reply_to_bot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn is_group(&self) -> bool {
        matches!(self, Self::Group | Self::Supergroup)
    }
}

#[derive(Debug, Clone)]
pub struct Sender {
    pub id: i64,
    pub display_name: String,
}

#[derive(Debug, Clone)]
pub enum EventContent {
    Text(String),
    Voice {
        file_id: String,
        duration_secs: u32,
        caption: Option<String>,
    },
}

/// How the platform should render an outgoing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Html,
    Markdown,
}

#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Send `text`, splitting it if needed. Returns the id of the last
    /// message sent.
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to: Option<i64>,
    ) -> Result<i64>;

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()>;

    async fn is_admin(&self, chat_id: i64, user_id: i64) -> Result<bool>;

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>>;

    /// Show the "typing…" indicator. Failures are logged, never returned.
    async fn send_typing(&self, chat_id: i64);
}

/// Keep the typing indicator alive (it expires after ~5s) until the returned
/// sender is dropped or signalled.
pub fn spawn_typing_loop(platform: Arc<dyn ChatPlatform>, chat_id: i64) -> oneshot::Sender<()> {
    let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        platform.send_typing(chat_id).await;
        loop {
            tokio::select! {
                _ = tokio::time::sleep(tokio::time::Duration::from_secs(4)) => {
                    platform.send_typing(chat_id).await;
                }
                _ = &mut cancel_rx => {
                    break;
                }
            }
        }
    });
    cancel_tx
}
