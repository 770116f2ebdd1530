//! Periodic housekeeping: retention pruning and a usage snapshot in the log.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use groqbot_types::usage::UsageSnapshot;

use crate::db::Database;
use crate::history::{HistoryStore, RETENTION_DAYS};

/// Outcome of one pass. `None` marks a step that failed (and was logged).
#[derive(Debug, Default)]
pub struct MaintenanceReport {
    pub pruned: Option<usize>,
    pub snapshot: Option<UsageSnapshot>,
}

/// Run both steps once. A failure in one step never skips the other.
pub fn run_once(history: &HistoryStore, db: &Database, processed: &AtomicU64) -> MaintenanceReport {
    let pruned = match history.prune(RETENTION_DAYS) {
        Ok(n) => {
            info!(pruned = n, retention_days = RETENTION_DAYS, "Pruned expired history");
            Some(n)
        }
        Err(e) => {
            error!("History pruning failed: {e}");
            None
        }
    };

    let snapshot = match db.usage_snapshot() {
        Ok(mut snapshot) => {
            snapshot.messages_processed = processed.load(Ordering::Relaxed);
            info!(
                total_chats = snapshot.total_chats,
                enabled_chats = snapshot.enabled_chats,
                stored_messages = snapshot.stored_messages,
                messages_processed = snapshot.messages_processed,
                "Usage snapshot"
            );
            if !snapshot.chat_models.is_empty() {
                info!("Chat models: {}", snapshot.chat_models_line());
            }
            Some(snapshot)
        }
        Err(e) => {
            error!("Usage snapshot failed: {e}");
            None
        }
    };

    MaintenanceReport { pruned, snapshot }
}

/// Run [`run_once`] after `first_delay` and then every `interval` until
/// `cancel` fires.
pub fn spawn_maintenance(
    history: Arc<HistoryStore>,
    db: Arc<Database>,
    processed: Arc<AtomicU64>,
    interval: Duration,
    first_delay: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + first_delay, interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    // SQLite calls block; keep them off the async workers.
                    let history = Arc::clone(&history);
                    let db = Arc::clone(&db);
                    let processed = Arc::clone(&processed);
                    let pass = tokio::task::spawn_blocking(move || {
                        run_once(&history, &db, &processed);
                    });
                    if let Err(e) = pass.await {
                        error!("Maintenance pass panicked: {e}");
                    }
                }
            }
        }
        info!("Maintenance task stopped");
    })
}
