use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use groqbot_types::config::BotConfig;

pub const TELEGRAM_TOKEN_ENV: &str = "TELEGRAM_TOKEN";
pub const GROQ_API_KEY_ENV: &str = "GROQ_API_KEY";

/// Returns the groqbot home directory (~/.groqbot/), or `./.groqbot` when
/// no home directory can be determined.
pub fn groqbot_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".groqbot")
}

/// Returns the path to the config file (~/.groqbot/config.toml)
pub fn config_path() -> PathBuf {
    groqbot_home().join("config.toml")
}

/// Returns the default database path (~/.groqbot/bot_data.db)
pub fn default_db_path() -> PathBuf {
    groqbot_home().join("bot_data.db")
}

/// Database location: the configured path, else the default.
pub fn db_path(config: &BotConfig) -> PathBuf {
    config.database.path.clone().unwrap_or_else(default_db_path)
}

/// Load config from `path` (or the default location), creating a default
/// file if it doesn't exist.
pub fn load_config(path: Option<&Path>) -> Result<BotConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(config_path);

    if !path.exists() {
        let default = BotConfig::default();
        save_config(&default, &path)?;
        return Ok(default);
    }

    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read config from {}", path.display()))?;
    let config: BotConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config at {}", path.display()))?;
    Ok(config)
}

/// Save config to disk, overwriting the existing file.
pub fn save_config(config: &BotConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let toml_str = toml::to_string_pretty(config).context("Failed to serialize config")?;
    std::fs::write(path, toml_str)
        .with_context(|| format!("Failed to write config to {}", path.display()))?;
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub telegram_token: String,
    pub groq_api_key: String,
}

/// Secrets from the environment, falling back to the config file.
pub fn resolve_credentials(config: &BotConfig) -> Result<Credentials> {
    resolve_with(config, |key| std::env::var(key).ok())
}

fn resolve_with(config: &BotConfig, env: impl Fn(&str) -> Option<String>) -> Result<Credentials> {
    let pick = |key: &str, fallback: &Option<String>| {
        env(key)
            .or_else(|| fallback.clone())
            .filter(|v| !v.trim().is_empty())
            .with_context(|| format!("{key} is not set (environment, .env or config file)"))
    };
    Ok(Credentials {
        telegram_token: pick(TELEGRAM_TOKEN_ENV, &config.telegram.token)?,
        groq_api_key: pick(GROQ_API_KEY_ENV, &config.groq.api_key)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_config_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = load_config(Some(&path)).unwrap();
        assert!(path.exists());
        assert_eq!(config.voice.max_duration_secs, 300);

        let mut changed = config;
        changed.telegram.respond_in_private = true;
        changed.groq.transcription_language = Some("ru".to_string());
        save_config(&changed, &path).unwrap();

        let reloaded = load_config(Some(&path)).unwrap();
        assert!(reloaded.telegram.respond_in_private);
        assert_eq!(reloaded.groq.transcription_language.as_deref(), Some("ru"));
    }

    #[test]
    fn broken_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "telegram = 5").unwrap();
        let err = load_config(Some(&path)).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }

    #[test]
    fn environment_wins_over_config_file() {
        let mut config = BotConfig::default();
        config.telegram.token = Some("from-file".to_string());
        config.groq.api_key = Some("file-key".to_string());

        let creds = resolve_with(&config, |key| {
            (key == TELEGRAM_TOKEN_ENV).then(|| "from-env".to_string())
        })
        .unwrap();
        assert_eq!(creds.telegram_token, "from-env");
        assert_eq!(creds.groq_api_key, "file-key");
    }

    #[test]
    fn missing_secret_names_the_variable() {
        let err = resolve_with(&BotConfig::default(), |_| None).unwrap_err();
        assert!(err.to_string().contains(TELEGRAM_TOKEN_ENV));
    }

    #[test]
    fn database_path_override() {
        let mut config = BotConfig::default();
        assert_eq!(db_path(&config), default_db_path());
        config.database.path = Some(PathBuf::from("/tmp/bot.db"));
        assert_eq!(db_path(&config), PathBuf::from("/tmp/bot.db"));
    }
}
