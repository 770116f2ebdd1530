//! Bounded per-chat conversation history.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use groqbot_types::history::{HistoryEntry, Role};

use crate::db::Database;
use crate::error::{BotError, BotResult};

/// Most entries ever fed back into a prompt.
pub const HISTORY_LIMIT: usize = 50;

/// Entries older than this many days are removed by the maintenance task.
pub const RETENTION_DAYS: i64 = 30;

pub struct HistoryStore {
    db: Arc<Database>,
}

impl HistoryStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Record a user or assistant turn. The system prompt lives in the
    /// chat's config and is never stored as history.
    pub fn append(&self, chat_id: i64, role: Role, content: &str) -> BotResult<HistoryEntry> {
        if role == Role::System {
            return Err(BotError::Validation(
                "System messages are not stored in history.".to_string(),
            ));
        }
        self.db.insert_history(chat_id, role, content, Utc::now())
    }

    /// The last `limit` entries of the chat, oldest first.
    pub fn recent(&self, chat_id: i64, limit: usize) -> BotResult<Vec<HistoryEntry>> {
        self.db.recent_history(chat_id, limit)
    }

    pub fn count(&self, chat_id: i64) -> BotResult<i64> {
        self.db.count_history(chat_id)
    }

    /// Delete every entry of one chat. Returns how many were removed.
    pub fn clear(&self, chat_id: i64) -> BotResult<usize> {
        self.db.delete_history(chat_id)
    }

    /// Delete entries of all chats older than `older_than_days`.
    pub fn prune(&self, older_than_days: i64) -> BotResult<usize> {
        self.prune_before(Utc::now() - Duration::days(older_than_days))
    }

    /// Delete entries created strictly before `cutoff`. Appends always stamp
    /// the current time, so this never races with a concurrent append.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> BotResult<usize> {
        self.db.delete_history_before(cutoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (Arc<Database>, HistoryStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        (Arc::clone(&db), HistoryStore::new(db))
    }

    #[test]
    fn recent_returns_last_n_in_order() {
        let (_, history) = store();
        for i in 0..60 {
            let role = if i % 2 == 0 { Role::User } else { Role::Assistant };
            history.append(9, role, &format!("msg {i}")).unwrap();
        }
        let recent = history.recent(9, HISTORY_LIMIT).unwrap();
        assert_eq!(recent.len(), HISTORY_LIMIT);
        assert_eq!(recent.first().unwrap().content, "msg 10");
        assert_eq!(recent.last().unwrap().content, "msg 59");
        assert!(recent.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[test]
    fn appending_past_limit_drops_oldest_never_newest() {
        let (_, history) = store();
        for i in 0..3 {
            history.append(1, Role::User, &format!("{i}")).unwrap();
        }
        history.append(1, Role::User, "newest").unwrap();
        let recent = history.recent(1, 3).unwrap();
        let contents: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["1", "2", "newest"]);
    }

    #[test]
    fn system_role_is_not_stored() {
        let (_, history) = store();
        let err = history.append(1, Role::System, "be helpful").unwrap_err();
        assert!(matches!(err, BotError::Validation(_)));
        assert_eq!(history.count(1).unwrap(), 0);
    }

    #[test]
    fn recent_has_no_side_effects() {
        let (_, history) = store();
        history.append(1, Role::User, "a").unwrap();
        assert_eq!(history.recent(1, 10).unwrap(), history.recent(1, 10).unwrap());
        assert_eq!(history.count(1).unwrap(), 1);
    }

    #[test]
    fn clear_only_touches_one_chat() {
        let (_, history) = store();
        history.append(1, Role::User, "a").unwrap();
        history.append(1, Role::Assistant, "b").unwrap();
        history.append(2, Role::User, "c").unwrap();

        assert_eq!(history.clear(1).unwrap(), 2);
        assert_eq!(history.count(1).unwrap(), 0);
        assert_eq!(history.count(2).unwrap(), 1);
        // idempotent
        assert_eq!(history.clear(1).unwrap(), 0);
    }

    #[test]
    fn prune_removes_exactly_the_expired_entries() {
        let (db, history) = store();
        let now = Utc::now();
        db.insert_history(1, Role::User, "ancient", now - Duration::days(45)).unwrap();
        db.insert_history(2, Role::User, "just expired", now - Duration::days(30) - Duration::minutes(1))
            .unwrap();
        db.insert_history(1, Role::User, "recent", now - Duration::days(29)).unwrap();
        history.append(2, Role::Assistant, "fresh").unwrap();

        assert_eq!(history.prune(RETENTION_DAYS).unwrap(), 2);
        assert_eq!(history.recent(1, 10).unwrap().len(), 1);
        assert_eq!(history.recent(2, 10).unwrap()[0].content, "fresh");
        assert_eq!(history.prune(RETENTION_DAYS).unwrap(), 0);
    }

    #[test]
    fn prune_keeps_entries_at_the_cutoff() {
        let (db, history) = store();
        let cutoff = Utc::now() - Duration::days(RETENTION_DAYS);
        db.insert_history(1, Role::User, "on the line", cutoff).unwrap();
        assert_eq!(history.prune_before(cutoff).unwrap(), 0);
    }

    #[test]
    fn prune_interleaved_with_appends() {
        let (db, history) = store();
        let old = Utc::now() - Duration::days(40);
        for i in 0..10 {
            db.insert_history(1, Role::User, &format!("old {i}"), old).unwrap();
            history.append(1, Role::User, &format!("new {i}")).unwrap();
            history.prune(RETENTION_DAYS).unwrap();
        }
        let remaining = history.recent(1, 100).unwrap();
        assert_eq!(remaining.len(), 10);
        assert!(remaining.iter().all(|e| e.content.starts_with("new")));
    }
}
