pub mod assembler;
pub mod channels;
pub mod chat_config;
pub mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod llm;
pub mod locks;
pub mod maintenance;
pub mod mention;
pub mod stt;

#[cfg(test)]
mod testing;

pub use error::{BotError, BotResult, UpstreamError};

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use groqbot_types::chat::ChatConfig;
use groqbot_types::history::Role;
use groqbot_types::models;

use channels::{ChatKind, ChatPlatform, EventContent, InboundEvent, TextFormat};
use chat_config::ConfigStore;
use commands::{CommandContext, Dispatcher};
use db::Database;
use history::{HistoryStore, HISTORY_LIMIT};
use llm::Inference;
use locks::ChatLocks;
use stt::Transcriber;

/// Runtime knobs the gateway needs from the configuration.
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub bot_username: String,
    pub respond_in_private: bool,
    pub max_voice_secs: u32,
    pub request_timeout: Duration,
    pub retry_backoff: Duration,
}

/// Routes every inbound chat event to the command dispatcher or the
/// conversation path and turns failures into chat replies.
pub struct Gateway {
    config: Arc<ConfigStore>,
    history: Arc<HistoryStore>,
    dispatcher: Dispatcher,
    platform: Arc<dyn ChatPlatform>,
    inference: Arc<dyn Inference>,
    transcriber: Arc<dyn Transcriber>,
    locks: ChatLocks,
    settings: GatewaySettings,
    messages_processed: Arc<AtomicU64>,
}

impl Gateway {
    pub fn new(
        db: Arc<Database>,
        default_system_prompt: &str,
        platform: Arc<dyn ChatPlatform>,
        inference: Arc<dyn Inference>,
        transcriber: Arc<dyn Transcriber>,
        settings: GatewaySettings,
    ) -> Self {
        let config = Arc::new(ConfigStore::new(Arc::clone(&db), default_system_prompt));
        let history = Arc::new(HistoryStore::new(db));
        let dispatcher = Dispatcher::new(
            Arc::clone(&config),
            Arc::clone(&history),
            Arc::clone(&platform),
            settings.bot_username.clone(),
        );
        Self {
            config,
            history,
            dispatcher,
            platform,
            inference,
            transcriber,
            locks: ChatLocks::new(),
            settings,
            messages_processed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn history(&self) -> Arc<HistoryStore> {
        Arc::clone(&self.history)
    }

    /// Number of model replies delivered since start.
    pub fn messages_processed(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.messages_processed)
    }

    /// Handle events until the channel closes or `cancel` fires. Each event
    /// runs on its own task.
    pub async fn serve(
        self: Arc<Self>,
        mut events: mpsc::UnboundedReceiver<InboundEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };
            let Some(event) = event else { break };
            let gateway = Arc::clone(&self);
            tokio::spawn(async move {
                gateway.handle_event(event).await;
            });
        }
        info!("Gateway stopped accepting events");
    }

    /// Process one event. Never fails: errors become a chat reply and a log
    /// line.
    pub async fn handle_event(&self, event: InboundEvent) {
        let chat_id = event.chat_id;
        let Err(err) = self.process_event(&event).await else {
            return;
        };

        match &err {
            BotError::StorageUnavailable(_) => error!(chat_id, "Storage failure: {err}"),
            BotError::Upstream(e) if !e.is_retryable() => error!(chat_id, "Upstream failure: {err}"),
            BotError::Upstream(_) => warn!(chat_id, "Upstream failure after retry: {err}"),
            _ => info!(chat_id, "Rejected request: {err}"),
        }

        let model = self
            .config
            .get_config(chat_id)
            .map(|c| c.model)
            .unwrap_or_else(|_| models::DEFAULT_MODEL.to_string());
        if let Err(e) = self
            .platform
            .send_message(chat_id, &err.user_message(&model), TextFormat::Plain, Some(event.message_id))
            .await
        {
            error!(chat_id, "Failed to deliver error reply: {e:#}");
        }
    }

    async fn process_event(&self, event: &InboundEvent) -> BotResult<()> {
        if let EventContent::Text(text) = &event.content {
            if let Some(command) = commands::parse(text, &self.settings.bot_username) {
                return self.run_command(event, command).await;
            }
        }

        let private = event.chat_kind == ChatKind::Private;
        if private && !self.settings.respond_in_private {
            debug!(chat_id = event.chat_id, "Ignoring private conversation");
            return Ok(());
        }
        if !private && !event.chat_kind.is_group() {
            return Ok(());
        }
        let always_addressed = private || event.reply_to_bot;

        match &event.content {
            EventContent::Text(text) => {
                let Some(text) =
                    mention::addressed_text(text, &self.settings.bot_username, always_addressed)
                else {
                    return Ok(());
                };
                let Some(config) = self.active_config(event.chat_id)? else {
                    return Ok(());
                };
                if text.is_empty() {
                    self.send(event, "Hello! How can I help you?", TextFormat::Plain).await;
                    return Ok(());
                }
                self.converse(event, &config, &text).await
            }
            EventContent::Voice {
                file_id,
                duration_secs,
                caption,
            } => {
                let Some(config) = self.active_config(event.chat_id)? else {
                    return Ok(());
                };
                // Over-long voice notes are refused even when not addressed.
                if *duration_secs > self.settings.max_voice_secs {
                    return Err(BotError::InputTooLarge {
                        duration_secs: *duration_secs,
                        max_secs: self.settings.max_voice_secs,
                    });
                }
                let mentioned = caption
                    .as_deref()
                    .is_some_and(|c| mention::mentions_bot(c, &self.settings.bot_username));
                if !(always_addressed || mentioned) {
                    return Ok(());
                }
                let Some(text) = self
                    .transcribe_voice(event, &config, file_id, *duration_secs)
                    .await?
                else {
                    return Ok(());
                };
                self.converse(event, &config, &text).await
            }
        }
    }

    async fn run_command(&self, event: &InboundEvent, command: commands::Command) -> BotResult<()> {
        self.config.ensure_config(event.chat_id)?;
        let ctx = CommandContext {
            chat_id: event.chat_id,
            sender_id: event.sender.id,
            is_private: event.chat_kind == ChatKind::Private,
        };
        let reply = self.dispatcher.execute(&ctx, command).await?;
        self.send(event, &reply.text, reply.format).await;
        Ok(())
    }

    /// The chat's config, persisted on first contact. `None` when the bot
    /// is disabled in this chat.
    fn active_config(&self, chat_id: i64) -> BotResult<Option<ChatConfig>> {
        let config = self.config.ensure_config(chat_id)?;
        if !config.enabled {
            info!(chat_id, "Bot is disabled in this chat, ignoring message");
            return Ok(None);
        }
        Ok(Some(config))
    }

    /// Download and transcribe a voice message, showing progress in a status
    /// message. `Ok(None)` means the failure was already reported there.
    async fn transcribe_voice(
        &self,
        event: &InboundEvent,
        config: &ChatConfig,
        file_id: &str,
        duration_secs: u32,
    ) -> BotResult<Option<String>> {
        let chat_id = event.chat_id;
        info!(chat_id, duration_secs, sender = %event.sender.display_name, "Voice message received");

        let status_id = self
            .platform
            .send_message(
                chat_id,
                "🔄 Processing your voice message...",
                TextFormat::Plain,
                Some(event.message_id),
            )
            .await
            .map_err(platform_error)?;

        let transcribed = async {
            let audio = self
                .with_retry("download", chat_id, || async move {
                    self.platform.download_file(file_id).await.map_err(platform_error_upstream)
                })
                .await?;
            self.with_retry("transcription", chat_id, || self.transcriber.transcribe(&audio))
                .await
        }
        .await;

        let (status_text, result) = match transcribed {
            Ok(text) => (format!("🔤 Voice message text:\n\n{text}"), Some(text)),
            Err(e) => {
                warn!(chat_id, "Voice transcription failed: {e}");
                (BotError::from(e).user_message(&config.model), None)
            }
        };
        if let Err(e) = self.platform.edit_message(chat_id, status_id, &status_text).await {
            warn!(chat_id, "Failed to update voice status message: {e:#}");
        }
        Ok(result)
    }

    /// One conversational turn. The user turn is stored before the model is
    /// called and stays even if the call fails; the assistant turn is stored
    /// only on success. The chat lock is never held across the model call.
    async fn converse(&self, event: &InboundEvent, config: &ChatConfig, text: &str) -> BotResult<()> {
        let chat_id = event.chat_id;
        let user_turn = format!("{}: {}", event.sender.display_name, text);

        let prompt = {
            let _guard = self.locks.lock(chat_id).await;
            let recent = self.history.recent(chat_id, HISTORY_LIMIT)?;
            let prompt = assembler::assemble(config, &recent, &user_turn);
            self.history.append(chat_id, Role::User, &user_turn)?;
            prompt
        };
        if prompt.dropped > 0 {
            debug!(chat_id, dropped = prompt.dropped, "Trimmed history to fit the context window");
        }

        info!(
            chat_id,
            model = %prompt.model,
            temperature = prompt.temperature,
            max_tokens = prompt.max_tokens,
            history = prompt.messages.len() - 2,
            "Requesting completion"
        );
        let typing = channels::spawn_typing_loop(Arc::clone(&self.platform), chat_id);
        let started = Instant::now();
        let result = self
            .with_retry("completion", chat_id, || self.inference.complete(&prompt))
            .await;
        let _ = typing.send(());
        let raw = result?;
        info!(
            chat_id,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Completion received"
        );

        // A reply with nothing outside its <think> block is not a turn.
        let reply = llm::clean_reply(&raw).ok_or(UpstreamError::EmptyResponse)?;
        {
            let _guard = self.locks.lock(chat_id).await;
            self.history.append(chat_id, Role::Assistant, &raw)?;
        }
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.send(event, &reply, TextFormat::Markdown).await;
        Ok(())
    }

    /// Run `call` under the request timeout, retrying once after the
    /// configured backoff if the failure is transient.
    async fn with_retry<T, F, Fut>(&self, what: &str, chat_id: i64, mut call: F) -> Result<T, UpstreamError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, UpstreamError>>,
    {
        let mut attempt = 1;
        loop {
            let result = tokio::time::timeout(self.settings.request_timeout, call())
                .await
                .unwrap_or(Err(UpstreamError::Timeout));
            match result {
                Err(e) if attempt == 1 && e.is_retryable() => {
                    warn!(chat_id, "{what} failed, retrying: {e}");
                    tokio::time::sleep(self.settings.retry_backoff).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    async fn send(&self, event: &InboundEvent, text: &str, format: TextFormat) {
        if let Err(e) = self
            .platform
            .send_message(event.chat_id, text, format, Some(event.message_id))
            .await
        {
            error!(chat_id = event.chat_id, "Failed to send reply: {e:#}");
        }
    }
}

fn platform_error_upstream(e: anyhow::Error) -> UpstreamError {
    UpstreamError::Transport(format!("{e:#}"))
}

fn platform_error(e: anyhow::Error) -> BotError {
    platform_error_upstream(e).into()
}
