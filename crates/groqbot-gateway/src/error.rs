//! Error taxonomy for everything that can go wrong while handling one chat
//! event. Each variant maps to a reply the chat sees.

use thiserror::Error;

use groqbot_types::models;

#[derive(Debug, Error)]
pub enum BotError {
    #[error("unknown model: {name}")]
    InvalidModel { name: String },

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: String,
        min: String,
        max: String,
    },

    #[error("invalid arguments: {0}")]
    Validation(String),

    #[error("command requires chat administrator rights")]
    Permission,

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("voice message is {duration_secs}s long, limit is {max_secs}s")]
    InputTooLarge { duration_secs: u32, max_secs: u32 },
}

/// Failures of the inference and transcription collaborators.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("rate limit or quota exceeded: {0}")]
    RateLimited(String),

    #[error("model has been decommissioned: {0}")]
    ModelDecommissioned(String),

    #[error("request timed out")]
    Timeout,

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("upstream returned an empty response")]
    EmptyResponse,
}

impl UpstreamError {
    /// Failures worth one more attempt after a short pause.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited(_) | Self::Timeout | Self::Transport(_) => true,
            Self::Http { status, .. } => *status >= 500,
            Self::ModelDecommissioned(_) | Self::EmptyResponse => false,
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(e.to_string())
        }
    }
}

impl From<rusqlite::Error> for BotError {
    fn from(e: rusqlite::Error) -> Self {
        Self::StorageUnavailable(e.to_string())
    }
}

impl BotError {
    pub fn out_of_range(
        field: &'static str,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
    ) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
        }
    }

    /// Text sent back to the chat. `model` is the chat's current model, used
    /// to make upstream failures actionable.
    pub fn user_message(&self, model: &str) -> String {
        match self {
            Self::InvalidModel { name } => format!(
                "Unknown model \"{name}\". Available models: {}\nUse /models for details.",
                models::model_names()
            ),
            Self::OutOfRange { field, min, max, .. } => {
                format!("The {field} must be between {min} and {max}.")
            }
            Self::Validation(msg) => msg.clone(),
            Self::Permission => {
                "⚠️ This command requires group administrator rights.".to_string()
            }
            Self::Upstream(UpstreamError::RateLimited(_)) => format!(
                "⚠️ The request limit for model {model} has been reached.\n\n\
                 Suggestions:\n\
                 1. Switch to another model, for example:\n\
                 • /set_model deepseek-r1-distill-llama-70b (no daily token cap)\n\
                 • /set_model llama3-8b-8192 (lighter model)\n\n\
                 2. Wait a while, limits reset daily.\n\n\
                 Use /models to see every model and its limits."
            ),
            Self::Upstream(UpstreamError::ModelDecommissioned(_)) => format!(
                "Model {model} is no longer available. An administrator can pick another one with /set_model {}.",
                models::DEFAULT_MODEL
            ),
            Self::Upstream(UpstreamError::Timeout) => {
                "The model took too long to answer. Please try again.".to_string()
            }
            Self::Upstream(_) => {
                "Something went wrong, try again later or switch model (/models lists the available ones)."
                    .to_string()
            }
            Self::StorageUnavailable(_) => {
                "Internal error, please try again later.".to_string()
            }
            Self::InputTooLarge { max_secs, .. } => format!(
                "⚠️ Your voice message is too long (over {max_secs} seconds). Please send a shorter one."
            ),
        }
    }
}

pub type BotResult<T> = Result<T, BotError>;
