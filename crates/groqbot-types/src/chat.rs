use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models;

pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Per-chat settings. A chat without a stored row behaves as
/// [`ChatConfig::default_for`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub chat_id: i64,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub enabled: bool,
    pub system_prompt: String,
    pub updated_at: DateTime<Utc>,
}

impl ChatConfig {
    pub fn default_for(chat_id: i64, system_prompt: impl Into<String>) -> Self {
        let model = models::default_model();
        Self {
            chat_id,
            model: model.name.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: model.default_max_tokens,
            enabled: true,
            system_prompt: system_prompt.into(),
            updated_at: Utc::now(),
        }
    }

    /// Catalog entry for the configured model. Rows written by older versions
    /// may name a model that has since left the catalog; those fall back to
    /// the default model's limits.
    pub fn model_info(&self) -> &'static models::ModelInfo {
        models::find_model(&self.model).unwrap_or_else(models::default_model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_uses_catalog_default() {
        let cfg = ChatConfig::default_for(-100, "be nice");
        assert_eq!(cfg.model, models::DEFAULT_MODEL);
        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.max_tokens, models::default_model().default_max_tokens);
        assert!(cfg.enabled);
        assert_eq!(cfg.system_prompt, "be nice");
    }

    #[test]
    fn retired_model_falls_back_to_default_limits() {
        let mut cfg = ChatConfig::default_for(1, "");
        cfg.model = "mixtral-8x7b-32768".to_string();
        assert_eq!(cfg.model_info().name, models::DEFAULT_MODEL);
    }
}
