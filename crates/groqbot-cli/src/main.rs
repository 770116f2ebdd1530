use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use groqbot_gateway::channels::telegram::{TelegramAdapter, TelegramClient};
use groqbot_gateway::channels::ChatPlatform;
use groqbot_gateway::config::{self, resolve_credentials};
use groqbot_gateway::db::Database;
use groqbot_gateway::history::{HistoryStore, RETENTION_DAYS};
use groqbot_gateway::llm::GroqClient;
use groqbot_gateway::maintenance::spawn_maintenance;
use groqbot_gateway::{Gateway, GatewaySettings};
use groqbot_types::config::{BotConfig, LoggingConfig};

#[derive(Parser)]
#[command(name = "groqbot", version, about = "groqbot — Telegram group chat bot backed by Groq models")]
struct Cli {
    /// Config file (default: ~/.groqbot/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the bot (default)
    Run,
    /// Show config and database locations and usage counts
    Status,
    /// Delete expired history once and exit
    Prune,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let cfg = config::load_config(cli.config.as_deref())?;
    let _log_guard = init_logging(&cfg.logging)?;

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(cfg).await,
        Commands::Status => status(&cfg, cli.config),
        Commands::Prune => {
            let db = Arc::new(Database::open(&config::db_path(&cfg))?);
            let removed = HistoryStore::new(db).prune(RETENTION_DAYS)?;
            println!("Removed {removed} history entries older than {RETENTION_DAYS} days.");
            Ok(())
        }
    }
}

/// Stderr always, plus a daily-rolling file when a log directory is set.
/// The returned guard flushes the file writer on drop.
fn init_logging(logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);

    let Some(dir) = &logging.directory else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
        return Ok(None);
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "groqbot.log"));
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Ok(Some(guard))
}

async fn run(cfg: BotConfig) -> Result<()> {
    let creds = resolve_credentials(&cfg)?;
    let db_path = config::db_path(&cfg);
    let db = Arc::new(Database::open(&db_path)?);
    info!("Database: {}", db_path.display());

    let telegram = TelegramClient::new(creds.telegram_token, cfg.telegram.api_url.clone())?;
    let me = telegram
        .get_me()
        .await
        .context("Failed to reach Telegram (check TELEGRAM_TOKEN)")?;
    let bot_username = me
        .username
        .clone()
        .context("The bot account has no username")?;
    info!(bot = %bot_username, "Connected to Telegram");

    let groq = Arc::new(GroqClient::new(&cfg.groq, creds.groq_api_key)?);
    let platform: Arc<dyn ChatPlatform> = Arc::new(telegram.clone());
    let gateway = Arc::new(Gateway::new(
        Arc::clone(&db),
        &cfg.defaults.system_prompt,
        platform,
        groq.clone(),
        groq,
        GatewaySettings {
            bot_username,
            respond_in_private: cfg.telegram.respond_in_private,
            max_voice_secs: cfg.voice.max_duration_secs,
            request_timeout: Duration::from_secs(cfg.groq.request_timeout_secs),
            retry_backoff: Duration::from_millis(cfg.groq.retry_backoff_ms),
        },
    ));

    let cancel = CancellationToken::new();
    let maintenance = spawn_maintenance(
        gateway.history(),
        Arc::clone(&db),
        gateway.messages_processed(),
        Duration::from_secs(cfg.maintenance.interval_secs.max(1)),
        Duration::from_secs(cfg.maintenance.first_run_delay_secs),
        cancel.clone(),
    );
    let events = TelegramAdapter::start(telegram, me, cfg.telegram.poll_timeout_secs, cancel.clone());
    let serve = tokio::spawn(Arc::clone(&gateway).serve(events, cancel.clone()));

    info!("groqbot is running, press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("Shutting down");
    cancel.cancel();
    let _ = serve.await;
    let _ = maintenance.await;
    Ok(())
}

fn status(cfg: &BotConfig, config_override: Option<PathBuf>) -> Result<()> {
    let config_file = config_override.unwrap_or_else(config::config_path);
    let db_path = config::db_path(cfg);
    println!("groqbot v{}", env!("CARGO_PKG_VERSION"));
    println!("Config: {}", config_file.display());
    println!("Database: {}", db_path.display());
    println!(
        "Credentials: {}",
        match resolve_credentials(cfg) {
            Ok(_) => "configured".to_string(),
            Err(e) => format!("missing ({e})"),
        }
    );
    println!("Private chats: {}", if cfg.telegram.respond_in_private { "answered" } else { "ignored" });

    if !db_path.exists() {
        println!("No database yet.");
        return Ok(());
    }
    let snapshot = Database::open(&db_path)?.usage_snapshot()?;
    println!("Chats: {} ({} enabled)", snapshot.total_chats, snapshot.enabled_chats);
    println!("Stored messages: {}", snapshot.stored_messages);
    if !snapshot.chat_models.is_empty() {
        println!("Models: {}", snapshot.chat_models_line());
    }
    Ok(())
}
