//! Per-chat settings with validation. Every mutator writes through to the
//! database before returning.

use std::sync::Arc;

use chrono::Utc;

use groqbot_types::chat::ChatConfig;
use groqbot_types::models;

use crate::db::Database;
use crate::error::{BotError, BotResult};

/// Longest system prompt an administrator may set.
pub const MAX_SYSTEM_PROMPT_CHARS: usize = 4000;

pub struct ConfigStore {
    db: Arc<Database>,
    default_system_prompt: String,
}

impl ConfigStore {
    pub fn new(db: Arc<Database>, default_system_prompt: impl Into<String>) -> Self {
        Self {
            db,
            default_system_prompt: default_system_prompt.into(),
        }
    }

    /// Stored config, or the default when the chat has none.
    pub fn get_config(&self, chat_id: i64) -> BotResult<ChatConfig> {
        Ok(self
            .db
            .get_chat_config(chat_id)?
            .unwrap_or_else(|| self.default_config(chat_id)))
    }

    /// Like [`get_config`](Self::get_config), but persists the default on the
    /// chat's first interaction.
    pub fn ensure_config(&self, chat_id: i64) -> BotResult<ChatConfig> {
        if let Some(config) = self.db.get_chat_config(chat_id)? {
            return Ok(config);
        }
        let config = self.default_config(chat_id);
        self.db.upsert_chat_config(&config)?;
        Ok(config)
    }

    pub fn set_model(&self, chat_id: i64, name: &str) -> BotResult<ChatConfig> {
        let model = models::find_model(name).ok_or_else(|| BotError::InvalidModel {
            name: name.to_string(),
        })?;
        self.update(chat_id, |cfg| {
            cfg.model = model.name.to_string();
            cfg.max_tokens = cfg.max_tokens.min(model.max_output_tokens);
        })
    }

    pub fn set_temperature(&self, chat_id: i64, value: f32) -> BotResult<ChatConfig> {
        // NaN fails the range check.
        if !(0.0..=1.0).contains(&value) {
            return Err(BotError::out_of_range("temperature", value, "0.0", "1.0"));
        }
        self.update(chat_id, |cfg| cfg.temperature = value)
    }

    pub fn set_max_tokens(&self, chat_id: i64, value: i64) -> BotResult<ChatConfig> {
        let current = self.get_config(chat_id)?;
        let ceiling = current.model_info().max_output_tokens;
        if value <= 0 || value > i64::from(ceiling) {
            return Err(BotError::out_of_range("max_tokens", value, 1, ceiling));
        }
        self.store(ChatConfig {
            max_tokens: value as u32,
            ..current
        })
    }

    /// Flip the enabled flag and return the new state.
    pub fn toggle_enabled(&self, chat_id: i64) -> BotResult<bool> {
        let updated = self.update(chat_id, |cfg| cfg.enabled = !cfg.enabled)?;
        Ok(updated.enabled)
    }

    pub fn set_system_prompt(&self, chat_id: i64, prompt: &str) -> BotResult<ChatConfig> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(BotError::Validation(
                "Please provide the prompt text, e.g. /set_prompt Answer like a pirate.".to_string(),
            ));
        }
        if prompt.chars().count() > MAX_SYSTEM_PROMPT_CHARS {
            return Err(BotError::Validation(format!(
                "The system prompt may be at most {MAX_SYSTEM_PROMPT_CHARS} characters long."
            )));
        }
        self.update(chat_id, |cfg| cfg.system_prompt = prompt.to_string())
    }

    pub fn reset_system_prompt(&self, chat_id: i64) -> BotResult<ChatConfig> {
        let default = self.default_system_prompt.clone();
        self.update(chat_id, |cfg| cfg.system_prompt = default)
    }

    fn default_config(&self, chat_id: i64) -> ChatConfig {
        ChatConfig::default_for(chat_id, self.default_system_prompt.clone())
    }

    fn update(&self, chat_id: i64, f: impl FnOnce(&mut ChatConfig)) -> BotResult<ChatConfig> {
        let mut config = self.get_config(chat_id)?;
        f(&mut config);
        self.store(config)
    }

    fn store(&self, mut config: ChatConfig) -> BotResult<ChatConfig> {
        config.updated_at = Utc::now();
        self.db.upsert_chat_config(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConfigStore {
        let db = Arc::new(Database::open_in_memory().unwrap());
        ConfigStore::new(db, "default prompt")
    }

    #[test]
    fn unknown_chat_gets_default() {
        let store = store();
        let cfg = store.get_config(-1001).unwrap();
        assert_eq!(cfg.model, "llama3-70b-8192");
        assert_eq!(cfg.temperature, 0.7);
        assert_eq!(cfg.max_tokens, 3000);
        assert!(cfg.enabled);
        assert_eq!(cfg.system_prompt, "default prompt");
    }

    #[test]
    fn get_config_does_not_persist_but_ensure_does() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let store = ConfigStore::new(Arc::clone(&db), "p");
        store.get_config(5).unwrap();
        assert!(db.get_chat_config(5).unwrap().is_none());
        store.ensure_config(5).unwrap();
        assert!(db.get_chat_config(5).unwrap().is_some());
    }

    #[test]
    fn valid_temperatures_roundtrip_exactly() {
        let store = store();
        for v in [0.0_f32, 0.1, 0.33, 0.5, 0.9, 1.0] {
            store.set_temperature(1, v).unwrap();
            assert_eq!(store.get_config(1).unwrap().temperature, v);
        }
    }

    #[test]
    fn invalid_temperature_leaves_config_unchanged() {
        let store = store();
        store.set_temperature(1, 0.9).unwrap();
        for v in [-0.01_f32, 1.01, 1.5, f32::NAN, f32::INFINITY] {
            let err = store.set_temperature(1, v).unwrap_err();
            assert!(matches!(err, BotError::OutOfRange { field: "temperature", .. }));
        }
        assert_eq!(store.get_config(1).unwrap().temperature, 0.9);
    }

    #[test]
    fn set_model_rejects_unknown_names() {
        let store = store();
        let err = store.set_model(1, "gpt-4o").unwrap_err();
        assert!(matches!(err, BotError::InvalidModel { .. }));
        assert_eq!(store.get_config(1).unwrap().model, models::DEFAULT_MODEL);
    }

    #[test]
    fn set_model_clamps_max_tokens_to_new_ceiling() {
        let store = store();
        store.set_model(1, "llama-3.3-70b-versatile").unwrap();
        store.set_max_tokens(1, 20_000).unwrap();
        let cfg = store.set_model(1, "gemma2-9b-it").unwrap();
        assert_eq!(cfg.max_tokens, 8192);
    }

    #[test]
    fn max_tokens_bounded_by_model_ceiling() {
        let store = store();
        assert!(matches!(
            store.set_max_tokens(1, 0).unwrap_err(),
            BotError::OutOfRange { .. }
        ));
        assert!(matches!(
            store.set_max_tokens(1, -5).unwrap_err(),
            BotError::OutOfRange { .. }
        ));
        assert!(matches!(
            store.set_max_tokens(1, 8193).unwrap_err(),
            BotError::OutOfRange { .. }
        ));
        assert_eq!(store.set_max_tokens(1, 8192).unwrap().max_tokens, 8192);
    }

    #[test]
    fn toggle_flips_and_persists() {
        let store = store();
        assert!(!store.toggle_enabled(3).unwrap());
        assert!(!store.get_config(3).unwrap().enabled);
        assert!(store.toggle_enabled(3).unwrap());
    }

    #[test]
    fn system_prompt_set_and_reset() {
        let store = store();
        assert!(matches!(
            store.set_system_prompt(1, "   ").unwrap_err(),
            BotError::Validation(_)
        ));
        store.set_system_prompt(1, " Speak like a pirate. ").unwrap();
        assert_eq!(store.get_config(1).unwrap().system_prompt, "Speak like a pirate.");
        store.reset_system_prompt(1).unwrap();
        assert_eq!(store.get_config(1).unwrap().system_prompt, "default prompt");
    }

    #[test]
    fn chats_are_independent() {
        let store = store();
        store.set_temperature(1, 0.2).unwrap();
        assert_eq!(store.get_config(2).unwrap().temperature, 0.7);
    }
}
