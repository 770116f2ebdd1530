use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::models;

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and friendly assistant in a Telegram group chat.
Your job is to help the members of the chat, answer their questions and keep the conversation going.
Keep answers short but informative.
Each user message is prefixed with the sender's name; do not address one particular member unless asked.
Answer in the language the question was asked in.
Do not overuse emoji.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    pub telegram: TelegramConfig,
    pub groq: GroqConfig,
    pub defaults: ChatDefaults,
    pub voice: VoiceConfig,
    pub maintenance: MaintenanceConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token. `TELEGRAM_TOKEN` takes priority at runtime.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_api_url")]
    pub api_url: String,
    /// Long-polling timeout passed to `getUpdates`.
    pub poll_timeout_secs: u64,
    /// Answer in one-to-one chats too, not only in groups.
    #[serde(default)]
    pub respond_in_private: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroqConfig {
    /// API key. `GROQ_API_KEY` takes priority at runtime.
    #[serde(default)]
    pub api_key: Option<String>,
    pub base_url: String,
    /// Upper bound for a single completion or transcription call.
    pub request_timeout_secs: u64,
    /// Pause before the single retry of a transient upstream failure.
    pub retry_backoff_ms: u64,
    pub transcription_model: String,
    /// ISO-639-1 hint for Whisper. Unset lets the model detect the language.
    #[serde(default)]
    pub transcription_language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatDefaults {
    pub system_prompt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    pub max_duration_secs: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    pub first_run_delay_secs: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `~/.groqbot/bot_data.db`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub level: String,
    /// Directory for daily-rotated log files. Console only when unset.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

fn default_api_url() -> String {
    "https://api.telegram.org".to_string()
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            telegram: TelegramConfig {
                token: None,
                api_url: default_api_url(),
                poll_timeout_secs: 30,
                respond_in_private: false,
            },
            groq: GroqConfig {
                api_key: None,
                base_url: "https://api.groq.com/openai/v1".to_string(),
                request_timeout_secs: 60,
                retry_backoff_ms: 2000,
                transcription_model: models::WHISPER_MODEL.to_string(),
                transcription_language: None,
            },
            defaults: ChatDefaults {
                system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            },
            voice: VoiceConfig {
                max_duration_secs: models::MAX_VOICE_DURATION_SECS,
            },
            maintenance: MaintenanceConfig {
                interval_secs: 3600,
                first_run_delay_secs: 10,
            },
            database: DatabaseConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                directory: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_roundtrips_through_toml() {
        let config = BotConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: BotConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.groq.transcription_model, "whisper-large-v3");
        assert_eq!(parsed.voice.max_duration_secs, 300);
        assert_eq!(parsed.maintenance.interval_secs, 3600);
        assert!(parsed.telegram.token.is_none());
    }

    #[test]
    fn optional_sections_may_be_omitted() {
        let text = r#"
[telegram]
poll_timeout_secs = 10

[groq]
base_url = "http://localhost:9000"
request_timeout_secs = 5
retry_backoff_ms = 0
transcription_model = "whisper-large-v3"
transcription_language = "ru"

[defaults]
system_prompt = "short answers"

[voice]
max_duration_secs = 60

[maintenance]
interval_secs = 60
first_run_delay_secs = 0

[logging]
level = "debug"
"#;
        let parsed: BotConfig = toml::from_str(text).unwrap();
        assert_eq!(parsed.telegram.api_url, "https://api.telegram.org");
        assert!(!parsed.telegram.respond_in_private);
        assert!(parsed.database.path.is_none());
        assert_eq!(parsed.groq.transcription_language.as_deref(), Some("ru"));
    }
}
