//! Slash commands: parsed once into typed values, then executed against the
//! stores with an administrator check for the settings commands.

use std::sync::Arc;

use tracing::{info, warn};

use groqbot_types::chat::ChatConfig;
use groqbot_types::models::{self, ModelInfo};

use crate::channels::{ChatPlatform, TextFormat};
use crate::chat_config::ConfigStore;
use crate::error::{BotError, BotResult};
use crate::history::{HistoryStore, HISTORY_LIMIT};

#[derive(Debug)]
pub enum Command {
    General(GeneralCommand),
    Admin(AdminCommand),
    /// An admin command whose arguments did not validate. Still subject to
    /// the permission check so non-admins learn nothing about the syntax.
    MalformedAdmin(BotError),
    Unknown(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneralCommand {
    Start,
    Help,
    Explain,
    Models,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AdminCommand {
    Settings,
    SetModel(String),
    SetTemperature(f32),
    SetMaxTokens(i64),
    Toggle,
    ClearHistory,
    SetPrompt(String),
    ResetPrompt,
}

/// Parse a `/command args` message. `None` when the text is not a command
/// or is addressed to another bot (`/help@otherbot`).
pub fn parse(text: &str, bot_username: &str) -> Option<Command> {
    let text = text.trim_start();
    let rest = text.strip_prefix('/')?;
    let (head, args) = match rest.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (rest, ""),
    };
    let name = match head.split_once('@') {
        Some((name, target)) => {
            if !target.eq_ignore_ascii_case(bot_username.trim_start_matches('@')) {
                return None;
            }
            name
        }
        None => head,
    };
    if name.is_empty() {
        return None;
    }

    let command = match name.to_ascii_lowercase().as_str() {
        "start" => Command::General(GeneralCommand::Start),
        "help" => Command::General(GeneralCommand::Help),
        "explain" => Command::General(GeneralCommand::Explain),
        "models" => Command::General(GeneralCommand::Models),
        "settings" => Command::Admin(AdminCommand::Settings),
        "toggle" => Command::Admin(AdminCommand::Toggle),
        "clear_history" => Command::Admin(AdminCommand::ClearHistory),
        "reset_prompt" => Command::Admin(AdminCommand::ResetPrompt),
        "set_model" => admin(parse_model(args)),
        "set_temp" => admin(parse_temperature(args)),
        "set_max_tokens" => admin(parse_max_tokens(args)),
        "set_prompt" => admin(parse_prompt(args)),
        other => Command::Unknown(other.to_string()),
    };
    Some(command)
}

fn admin(parsed: BotResult<AdminCommand>) -> Command {
    match parsed {
        Ok(cmd) => Command::Admin(cmd),
        Err(e) => Command::MalformedAdmin(e),
    }
}

fn first_arg(args: &str) -> Option<&str> {
    args.split_whitespace().next()
}

fn parse_model(args: &str) -> BotResult<AdminCommand> {
    let name = first_arg(args).ok_or_else(|| {
        BotError::Validation(format!(
            "Please name a model, e.g. /set_model {}\nUse /models to see the available ones.",
            models::DEFAULT_MODEL
        ))
    })?;
    let model = models::find_model(name).ok_or_else(|| BotError::InvalidModel {
        name: name.to_string(),
    })?;
    Ok(AdminCommand::SetModel(model.name.to_string()))
}

fn parse_temperature(args: &str) -> BotResult<AdminCommand> {
    let raw = first_arg(args).ok_or_else(|| {
        BotError::Validation("Please give a temperature between 0.0 and 1.0, e.g. /set_temp 0.7".to_string())
    })?;
    // Accept a decimal comma as well.
    let value: f32 = raw
        .replace(',', ".")
        .parse()
        .map_err(|_| BotError::Validation(format!("\"{raw}\" is not a number.")))?;
    Ok(AdminCommand::SetTemperature(value))
}

fn parse_max_tokens(args: &str) -> BotResult<AdminCommand> {
    let raw = first_arg(args).ok_or_else(|| {
        BotError::Validation("Please give the maximum reply length in tokens, e.g. /set_max_tokens 2000".to_string())
    })?;
    let value: i64 = raw
        .parse()
        .map_err(|_| BotError::Validation(format!("\"{raw}\" is not a whole number.")))?;
    Ok(AdminCommand::SetMaxTokens(value))
}

fn parse_prompt(args: &str) -> BotResult<AdminCommand> {
    if args.is_empty() {
        return Err(BotError::Validation(
            "Please provide the prompt text, e.g. /set_prompt Answer like a pirate.".to_string(),
        ));
    }
    Ok(AdminCommand::SetPrompt(args.to_string()))
}

/// Where a command came from.
#[derive(Debug, Clone, Copy)]
pub struct CommandContext {
    pub chat_id: i64,
    pub sender_id: i64,
    pub is_private: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub text: String,
    pub format: TextFormat,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Plain,
        }
    }

    fn html(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            format: TextFormat::Html,
        }
    }
}

pub struct Dispatcher {
    config: Arc<ConfigStore>,
    history: Arc<HistoryStore>,
    platform: Arc<dyn ChatPlatform>,
    bot_username: String,
}

impl Dispatcher {
    pub fn new(
        config: Arc<ConfigStore>,
        history: Arc<HistoryStore>,
        platform: Arc<dyn ChatPlatform>,
        bot_username: impl Into<String>,
    ) -> Self {
        Self {
            config,
            history,
            platform,
            bot_username: bot_username.into(),
        }
    }

    pub async fn execute(&self, ctx: &CommandContext, command: Command) -> BotResult<Reply> {
        match command {
            Command::General(cmd) => self.general(ctx, cmd).await,
            Command::Unknown(name) => {
                info!(chat_id = ctx.chat_id, command = %name, "Unknown command");
                let is_admin = self.is_admin(ctx).await;
                Ok(self.help(is_admin))
            }
            Command::Admin(cmd) => {
                self.require_admin(ctx).await?;
                self.admin(ctx, cmd)
            }
            Command::MalformedAdmin(err) => {
                self.require_admin(ctx).await?;
                Err(err)
            }
        }
    }

    async fn general(&self, ctx: &CommandContext, cmd: GeneralCommand) -> BotResult<Reply> {
        match cmd {
            GeneralCommand::Start => Ok(Reply::plain(format!(
                "Hi! I'm a bot powered by the Groq API. I answer messages that mention me as @{}.\n\
                 Use /help for the list of commands and /models for the available models.",
                self.bot_username
            ))),
            GeneralCommand::Help => {
                let is_admin = self.is_admin(ctx).await;
                Ok(self.help(is_admin))
            }
            GeneralCommand::Explain => {
                let is_admin = self.is_admin(ctx).await;
                let admin_part = if is_admin {
                    let config = self.config.get_config(ctx.chat_id)?;
                    let stored = self.history.count(ctx.chat_id)?;
                    Some((config, stored))
                } else {
                    None
                };
                Ok(Reply::html(self.explain(admin_part)))
            }
            GeneralCommand::Models => Ok(Reply::html(models_text())),
        }
    }

    fn admin(&self, ctx: &CommandContext, cmd: AdminCommand) -> BotResult<Reply> {
        let chat_id = ctx.chat_id;
        info!(chat_id, sender_id = ctx.sender_id, command = ?cmd, "Admin command");
        match cmd {
            AdminCommand::Settings => {
                let config = self.config.get_config(chat_id)?;
                let stored = self.history.count(chat_id)?;
                Ok(Reply::html(settings_text(&config, stored)))
            }
            AdminCommand::SetModel(name) => {
                let before = self.config.get_config(chat_id)?;
                let config = self.config.set_model(chat_id, &name)?;
                let info = config.model_info();
                let mut text = format!(
                    "✅ Model set: <b>{}</b>\n\n{}",
                    escape_html(&config.model),
                    model_details(info)
                );
                if config.max_tokens < before.max_tokens {
                    text.push_str(&format!(
                        "\n\nMaximum reply length lowered to <b>{}</b> tokens to fit this model.",
                        config.max_tokens
                    ));
                }
                Ok(Reply::html(text))
            }
            AdminCommand::SetTemperature(value) => {
                let config = self.config.set_temperature(chat_id, value)?;
                Ok(Reply::html(format!(
                    "Temperature set to <b>{}</b>\n\n{TEMPERATURE_GUIDE}",
                    config.temperature
                )))
            }
            AdminCommand::SetMaxTokens(value) => {
                let config = self.config.set_max_tokens(chat_id, value)?;
                Ok(Reply::html(format!(
                    "Maximum reply length set to <b>{}</b> tokens.\n\n\
                     The higher the value, the longer the answers can be.",
                    config.max_tokens
                )))
            }
            AdminCommand::Toggle => {
                let enabled = self.config.toggle_enabled(chat_id)?;
                let state = if enabled { "active" } else { "inactive" };
                Ok(Reply::plain(format!("The bot is now {state} in this chat.")))
            }
            AdminCommand::ClearHistory => {
                let removed = self.history.clear(chat_id)?;
                Ok(Reply::plain(format!(
                    "Chat history cleared ({removed} messages removed)."
                )))
            }
            AdminCommand::SetPrompt(prompt) => {
                self.config.set_system_prompt(chat_id, &prompt)?;
                Ok(Reply::plain("System prompt updated."))
            }
            AdminCommand::ResetPrompt => {
                self.config.reset_system_prompt(chat_id)?;
                Ok(Reply::plain("System prompt reset to the default."))
            }
        }
    }

    async fn require_admin(&self, ctx: &CommandContext) -> BotResult<()> {
        if self.is_admin(ctx).await {
            Ok(())
        } else {
            Err(BotError::Permission)
        }
    }

    /// In a private chat the sender administers their own chat. A failed
    /// lookup counts as "not an administrator".
    async fn is_admin(&self, ctx: &CommandContext) -> bool {
        if ctx.is_private {
            return true;
        }
        match self.platform.is_admin(ctx.chat_id, ctx.sender_id).await {
            Ok(is_admin) => is_admin,
            Err(e) => {
                warn!(chat_id = ctx.chat_id, "Administrator lookup failed: {e:#}");
                false
            }
        }
    }

    fn help(&self, is_admin: bool) -> Reply {
        let mut text = format!(
            "Available commands:\n\
             /start - Start the bot\n\
             /help - Show this message\n\
             /explain - How to use the bot\n\
             /models - Available models\n\n\
             Mention me as @{} in a message to talk to me.",
            self.bot_username
        );
        if !is_admin {
            return Reply::plain(text);
        }
        text.push_str(
            "\n\n<b>Administrator commands:</b>\n\
             /settings - Show the current settings\n\
             /set_model [model] - Choose the model\n\
             /set_temp [0.0-1.0] - Set the sampling temperature\n\
             /set_max_tokens [n] - Set the maximum reply length\n\
             /toggle - Enable or disable the bot in this chat\n\
             /clear_history - Forget this chat's history\n\
             /set_prompt [text] - Replace the system prompt\n\
             /reset_prompt - Restore the default system prompt",
        );
        Reply::html(text)
    }

    fn explain(&self, admin: Option<(ChatConfig, i64)>) -> String {
        let bot = &self.bot_username;
        let mut text = format!(
            "📋 <b>How to use the bot</b>\n\n\
             <b>Talking to the bot:</b>\n\
             • Mention it: @{bot} [your question]\n\
             • Reply to one of its messages\n\
             • Send a voice message that mentions the bot in its caption or replies to it\n\n\
             <b>Examples:</b>\n\
             • @{bot} explain quantum entanglement\n\
             • @{bot} solve 2x + 5 = 15\n\
             • @{bot} write a Rust function that parses JSON\n\n\
             <b>Model sizes:</b>\n\
             • Large models (llama3-70b-8192) for complex tasks\n\
             • Medium models (mistral-saba-24b) for general use\n\
             • Compact models (llama3-8b-8192, gemma2-9b-it) for quick questions\n\n\
             Use /models for details on each model."
        );
        let Some((config, stored)) = admin else {
            return text;
        };
        text.push_str(&format!(
            "\n\n<b>Settings (administrators only):</b>\n\n\
             <b>Model</b>\n\
             Command: /set_model [model]\n\
             Current model: <b>{model}</b>\n\n\
             <b>Temperature</b>\n\
             Command: /set_temp [0.0-1.0]\n\
             {TEMPERATURE_GUIDE}\n\
             Current temperature: <b>{temperature}</b>\n\n\
             <b>Maximum reply length</b>\n\
             Command: /set_max_tokens [n]\n\
             • The higher the value, the longer the answers can be\n\
             • Up to {ceiling} tokens for the current model\n\
             Current value: <b>{max_tokens}</b>\n\n\
             <b>History</b>\n\
             Command: /clear_history\n\
             • The bot remembers the conversation for more relevant answers\n\
             • Clearing helps when the topic changes\n\
             Stored messages: <b>{stored}/{HISTORY_LIMIT}</b>\n\n\
             <b>System prompt</b>\n\
             Commands: /set_prompt [text], /reset_prompt\n\n\
             <b>On/off</b>\n\
             Command: /toggle\n\
             Current status: <b>{status}</b>\n\n\
             <b>🔍 Suggested settings:</b>\n\
             • General use: llama3-70b-8192, temperature 0.7\n\
             • Facts and precise answers: llama3-70b-8192, temperature 0.2\n\
             • Creative tasks: llama3-70b-8192, temperature 0.9\n\
             • Quick simple answers: llama3-8b-8192, temperature 0.5",
            model = escape_html(&config.model),
            temperature = config.temperature,
            ceiling = config.model_info().max_output_tokens,
            max_tokens = config.max_tokens,
            status = if config.enabled { "Active" } else { "Inactive" },
        ));
        text
    }
}

const TEMPERATURE_GUIDE: &str = "<b>What it means:</b>\n\
    • <b>Low (0.1-0.3)</b>: predictable, precise answers. Good for facts and code.\n\
    • <b>Medium (0.4-0.7)</b>: balance of precision and variety. Fits most tasks.\n\
    • <b>High (0.8-1.0)</b>: creative, varied answers. Good for brainstorming.";

fn settings_text(config: &ChatConfig, stored: i64) -> String {
    let prompt: String = config.system_prompt.chars().take(300).collect();
    let ellipsis = if config.system_prompt.chars().count() > 300 { "…" } else { "" };
    format!(
        "<b>Current settings:</b>\n\
         • Model: <b>{}</b>\n\
         • Temperature: <b>{}</b>\n\
         • Maximum reply length: <b>{} tokens</b>\n\
         • Bot: <b>{}</b>\n\
         • Messages in history: <b>{stored}/{HISTORY_LIMIT}</b>\n\
         • System prompt: <i>{}{ellipsis}</i>\n\n\
         <b>About the current model:</b>\n{}",
        escape_html(&config.model),
        config.temperature,
        config.max_tokens,
        if config.enabled { "active" } else { "inactive" },
        escape_html(&prompt),
        model_details(config.model_info()),
    )
}

fn model_details(info: &ModelInfo) -> String {
    format!(
        "• {}\n• Best for: {}\n• Features: {}\n• Limits: {}",
        escape_html(info.description),
        escape_html(info.use_case),
        escape_html(info.features),
        escape_html(info.limits),
    )
}

fn models_text() -> String {
    let mut text = String::from("<b>Available models:</b>\n\n");
    for info in models::MODELS {
        text.push_str(&format!(
            "<b>{}</b>\n{}\n\n",
            escape_html(info.name),
            model_details(info)
        ));
    }
    text.push_str(&format!(
        "<b>Voice messages: {}</b>\n\
         • Speech recognition for voice messages\n\
         • Limits: up to {} seconds per message\n\n\
         Set a model with /set_model [model name]",
        models::WHISPER_MODEL,
        models::MAX_VOICE_DURATION_SECS,
    ));
    text
}

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
