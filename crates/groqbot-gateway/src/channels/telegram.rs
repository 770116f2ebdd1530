//! Telegram Bot API channel adapter.
//!
//! Runs long polling in a background task and turns updates into
//! [`InboundEvent`]s; outgoing calls go through [`TelegramClient`].

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{ChatKind, ChatPlatform, EventContent, InboundEvent, Sender, TextFormat};

/// Stay a little under Telegram's 4096-character message limit.
pub const MAX_MESSAGE_CHARS: usize = 4000;

// ── Telegram API types ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TgResponse<T> {
    ok: bool,
    result: Option<T>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgUpdate {
    update_id: i64,
    message: Option<TgMessage>,
}

#[derive(Debug, Deserialize)]
struct TgMessage {
    message_id: i64,
    from: Option<TgUser>,
    chat: TgChat,
    text: Option<String>,
    caption: Option<String>,
    voice: Option<TgVoice>,
    reply_to_message: Option<Box<TgMessage>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct TgVoice {
    file_id: String,
    #[serde(default)]
    duration: u32,
}

#[derive(Debug, Deserialize)]
struct TgFile {
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TgChatMember {
    user: TgUser,
}

#[derive(Debug, Deserialize)]
struct TgSentMessage {
    message_id: i64,
}

// ── Client ──────────────────────────────────────────────────────────────

/// Thin wrapper over the Bot HTTP API.
#[derive(Clone)]
pub struct TelegramClient {
    client: reqwest::Client,
    token: String,
    api_url: String,
}

impl TelegramClient {
    pub fn new(token: String, api_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .context("Failed to build Telegram HTTP client")?;
        Ok(Self {
            client,
            token,
            api_url: api_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_url, self.token)
    }

    /// The bot's own account, used for mention and reply detection.
    pub async fn get_me(&self) -> Result<TgUser> {
        let resp: TgResponse<TgUser> = self
            .client
            .get(self.method_url("getMe"))
            .timeout(Duration::from_secs(30))
            .send()
            .await
            .context("Failed to call getMe")?
            .json()
            .await?;
        into_result(resp, "getMe")
    }

    async fn get_updates(&self, offset: i64, timeout: u64) -> Result<Vec<TgUpdate>> {
        let resp: TgResponse<Vec<TgUpdate>> = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", timeout.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .timeout(Duration::from_secs(timeout + 10))
            .send()
            .await?
            .json()
            .await?;
        into_result(resp, "getUpdates")
    }

    async fn send_chunk(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to: Option<i64>,
    ) -> Result<i64> {
        let resp = self.post_message(chat_id, text, format, reply_to).await?;
        if resp.ok || format == TextFormat::Plain {
            return into_result(resp, "sendMessage").map(|m| m.message_id);
        }

        // Model output is not always valid Markdown; retry as plain text.
        warn!(
            "Telegram rejected formatted message ({}), resending as plain text",
            resp.description.unwrap_or_default()
        );
        let plain = match format {
            TextFormat::Html => strip_html(text),
            _ => text.to_string(),
        };
        let resp = self
            .post_message(chat_id, &plain, TextFormat::Plain, reply_to)
            .await?;
        into_result(resp, "sendMessage").map(|m| m.message_id)
    }

    async fn post_message(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to: Option<i64>,
    ) -> Result<TgResponse<TgSentMessage>> {
        let mut params = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(mode) = parse_mode(format) {
            params["parse_mode"] = serde_json::json!(mode);
        }
        if let Some(reply_id) = reply_to {
            params["reply_parameters"] = serde_json::json!({
                "message_id": reply_id,
                "allow_sending_without_reply": true,
            });
        }

        let resp = self
            .client
            .post(self.method_url("sendMessage"))
            .json(&params)
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .json()
            .await?;
        Ok(resp)
    }
}

#[async_trait]
impl ChatPlatform for TelegramClient {
    async fn send_message(
        &self,
        chat_id: i64,
        text: &str,
        format: TextFormat,
        reply_to: Option<i64>,
    ) -> Result<i64> {
        let mut last_id = 0;
        for (i, chunk) in split_message(text, MAX_MESSAGE_CHARS).iter().enumerate() {
            // Only the first chunk is threaded under the original message.
            let reply_to = if i == 0 { reply_to } else { None };
            last_id = self.send_chunk(chat_id, chunk, format, reply_to).await?;
        }
        Ok(last_id)
    }

    async fn edit_message(&self, chat_id: i64, message_id: i64, text: &str) -> Result<()> {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": truncate_chars(text, MAX_MESSAGE_CHARS),
        });
        let resp: TgResponse<serde_json::Value> = self
            .client
            .post(self.method_url("editMessageText"))
            .json(&params)
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .json()
            .await?;
        into_result(resp, "editMessageText").map(|_| ())
    }

    async fn is_admin(&self, chat_id: i64, user_id: i64) -> Result<bool> {
        let resp: TgResponse<Vec<TgChatMember>> = self
            .client
            .get(self.method_url("getChatAdministrators"))
            .query(&[("chat_id", chat_id.to_string())])
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .json()
            .await?;
        let admins = into_result(resp, "getChatAdministrators")?;
        let is_admin = admins.iter().any(|m| m.user.id == user_id);
        info!(chat_id, user_id, is_admin, "Checked administrator rights");
        Ok(is_admin)
    }

    async fn download_file(&self, file_id: &str) -> Result<Vec<u8>> {
        // Step 1: getFile to get file_path
        let resp: TgResponse<TgFile> = self
            .client
            .get(self.method_url("getFile"))
            .query(&[("file_id", file_id)])
            .timeout(Duration::from_secs(30))
            .send()
            .await?
            .json()
            .await?;
        let file_path = into_result(resp, "getFile")?
            .file_path
            .ok_or_else(|| anyhow::anyhow!("No file_path in getFile response"))?;

        // Step 2: Download the file
        let download_url = format!("{}/file/bot{}/{file_path}", self.api_url, self.token);
        let resp = self
            .client
            .get(&download_url)
            .timeout(Duration::from_secs(60))
            .send()
            .await?
            .error_for_status()?;
        let data = resp.bytes().await?.to_vec();
        info!("Downloaded Telegram file ({} bytes)", data.len());
        Ok(data)
    }

    async fn send_typing(&self, chat_id: i64) {
        let params = serde_json::json!({
            "chat_id": chat_id,
            "action": "typing",
        });
        match self
            .client
            .post(self.method_url("sendChatAction"))
            .json(&params)
            .timeout(Duration::from_secs(10))
            .send()
            .await
        {
            Ok(resp) => {
                if !resp.status().is_success() {
                    warn!("sendChatAction failed: HTTP {}", resp.status());
                }
            }
            Err(e) => {
                warn!("sendChatAction error: {e}");
            }
        }
    }
}

// ── Long polling ────────────────────────────────────────────────────────

pub struct TelegramAdapter;

impl TelegramAdapter {
    /// Start long polling. Events arrive on the returned receiver until
    /// `cancel` fires.
    pub fn start(
        client: TelegramClient,
        bot: TgUser,
        poll_timeout: u64,
        cancel: CancellationToken,
    ) -> mpsc::UnboundedReceiver<InboundEvent> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            info!("Telegram adapter started (long polling)");

            loop {
                let updates = tokio::select! {
                    _ = cancel.cancelled() => break,
                    updates = client.get_updates(offset, poll_timeout) => updates,
                };
                match updates {
                    Ok(updates) => {
                        for update in updates {
                            offset = update.update_id + 1;
                            let Some(msg) = update.message else { continue };
                            let Some(event) = to_event(msg, bot.id) else {
                                continue; // Skip non-text, non-voice messages
                            };
                            debug!(chat_id = event.chat_id, "Telegram update received");
                            if inbound_tx.send(event).is_err() {
                                error!("Telegram inbound channel closed");
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Telegram polling error: {e}");
                        tokio::select! {
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
                        }
                    }
                }
            }
            info!("Telegram polling stopped");
        });

        inbound_rx
    }
}

fn to_event(msg: TgMessage, bot_id: i64) -> Option<InboundEvent> {
    let chat_kind = match msg.chat.kind.as_str() {
        "private" => ChatKind::Private,
        "group" => ChatKind::Group,
        "supergroup" => ChatKind::Supergroup,
        _ => ChatKind::Channel,
    };

    let sender = match &msg.from {
        Some(user) => Sender {
            id: user.id,
            display_name: user
                .username
                .clone()
                .filter(|u| !u.is_empty())
                .or_else(|| Some(user.first_name.clone()).filter(|n| !n.is_empty()))
                .unwrap_or_else(|| "Unknown".to_string()),
        },
        None => Sender {
            id: 0,
            display_name: "Unknown".to_string(),
        },
    };

    let content = if let Some(voice) = msg.voice {
        EventContent::Voice {
            file_id: voice.file_id,
            duration_secs: voice.duration,
            caption: msg.caption,
        }
    } else {
        EventContent::Text(msg.text.filter(|t| !t.is_empty())?)
    };

    let reply_to_bot = msg
        .reply_to_message
        .as_ref()
        .and_then(|r| r.from.as_ref())
        .is_some_and(|u| u.id == bot_id);

    Some(InboundEvent {
        chat_id: msg.chat.id,
        chat_kind,
        message_id: msg.message_id,
        sender,
        content,
        reply_to_bot,
    })
}

fn into_result<T>(resp: TgResponse<T>, method: &str) -> Result<T> {
    if !resp.ok {
        return Err(anyhow::anyhow!(
            "Telegram API error in {method}: {}",
            resp.description.unwrap_or_default()
        ));
    }
    resp.result
        .ok_or_else(|| anyhow::anyhow!("Telegram API returned no result for {method}"))
}

fn parse_mode(format: TextFormat) -> Option<&'static str> {
    match format {
        TextFormat::Plain => None,
        TextFormat::Html => Some("HTML"),
        TextFormat::Markdown => Some("Markdown"),
    }
}

/// Undo the markup produced by the command replies so the text can be sent
/// without a parse mode.
fn strip_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => in_tag = false,
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Split on paragraph boundaries so each part stays under `max_chars`;
/// paragraphs that are too long on their own are cut at char boundaries.
pub fn split_message(text: &str, max_chars: usize) -> Vec<String> {
    if text.chars().count() <= max_chars {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_len = 0;

    for paragraph in text.split("\n\n") {
        let para_len = paragraph.chars().count();
        let sep_len = if current.is_empty() { 0 } else { 2 };

        if current_len + sep_len + para_len <= max_chars {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            current_len += sep_len + para_len;
            continue;
        }

        if !current.is_empty() {
            parts.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if para_len <= max_chars {
            current.push_str(paragraph);
            current_len = para_len;
        } else {
            let chars: Vec<char> = paragraph.chars().collect();
            for chunk in chars.chunks(max_chars) {
                parts.push(chunk.iter().collect());
            }
        }
    }

    if !current.trim().is_empty() {
        parts.push(current);
    }
    parts
}
