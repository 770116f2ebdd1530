use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use groqbot_types::chat::ChatConfig;
use groqbot_types::history::{HistoryEntry, Role};
use groqbot_types::usage::{ChatModel, UsageSnapshot};

use crate::error::{BotError, BotResult};

/// The SQLite connection shared by the config and history stores.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database at {}", path.display()))?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables().context("Failed to create tables")?;
        Ok(db)
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn: Mutex::new(conn) };
        db.init_tables()?;
        Ok(db)
    }

    fn init_tables(&self) -> BotResult<()> {
        let conn = self.lock()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chat_settings (
                chat_id       INTEGER PRIMARY KEY,
                model         TEXT NOT NULL,
                temperature   REAL NOT NULL,
                max_tokens    INTEGER NOT NULL,
                active        INTEGER NOT NULL DEFAULT 1,
                system_prompt TEXT NOT NULL,
                updated_at    TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS message_history (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                chat_id     INTEGER NOT NULL REFERENCES chat_settings(chat_id),
                role        TEXT NOT NULL,
                content     TEXT NOT NULL,
                created_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_history_chat ON message_history(chat_id, created_at);
            CREATE INDEX IF NOT EXISTS idx_history_created ON message_history(created_at);",
        )?;
        Ok(())
    }

    fn lock(&self) -> BotResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| BotError::StorageUnavailable("database lock poisoned".to_string()))
    }

    // --- Chat settings ---

    pub fn get_chat_config(&self, chat_id: i64) -> BotResult<Option<ChatConfig>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT chat_id, model, temperature, max_tokens, active, system_prompt, updated_at
                 FROM chat_settings WHERE chat_id = ?1",
                params![chat_id],
                |row| {
                    Ok(ConfigRow {
                        chat_id: row.get(0)?,
                        model: row.get(1)?,
                        temperature: row.get(2)?,
                        max_tokens: row.get(3)?,
                        active: row.get(4)?,
                        system_prompt: row.get(5)?,
                        updated_at: row.get(6)?,
                    })
                },
            )
            .optional()?;
        row.map(ConfigRow::into_config).transpose()
    }

    pub fn upsert_chat_config(&self, config: &ChatConfig) -> BotResult<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO chat_settings (chat_id, model, temperature, max_tokens, active, system_prompt, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(chat_id) DO UPDATE SET
                model = excluded.model,
                temperature = excluded.temperature,
                max_tokens = excluded.max_tokens,
                active = excluded.active,
                system_prompt = excluded.system_prompt,
                updated_at = excluded.updated_at",
            params![
                config.chat_id,
                config.model,
                f64::from(config.temperature),
                config.max_tokens,
                config.enabled,
                config.system_prompt,
                to_db_time(&config.updated_at),
            ],
        )?;
        Ok(())
    }

    // --- Message history ---

    pub fn insert_history(
        &self,
        chat_id: i64,
        role: Role,
        content: &str,
        created_at: DateTime<Utc>,
    ) -> BotResult<HistoryEntry> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO message_history (chat_id, role, content, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![chat_id, role.as_str(), content, to_db_time(&created_at)],
        )?;
        Ok(HistoryEntry {
            id: conn.last_insert_rowid(),
            chat_id,
            role,
            content: content.to_string(),
            created_at,
        })
    }

    /// The newest `limit` entries of a chat, returned oldest first.
    pub fn recent_history(&self, chat_id: i64, limit: usize) -> BotResult<Vec<HistoryEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, chat_id, role, content, created_at FROM (
                SELECT id, chat_id, role, content, created_at
                FROM message_history WHERE chat_id = ?1
                ORDER BY created_at DESC, id DESC
                LIMIT ?2
             ) ORDER BY created_at ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![chat_id, limit as i64], |row| {
            Ok(HistoryRow {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                role: row.get(2)?,
                content: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?.into_entry()?);
        }
        Ok(entries)
    }

    pub fn count_history(&self, chat_id: i64) -> BotResult<i64> {
        let conn = self.lock()?;
        let count = conn.query_row(
            "SELECT COUNT(*) FROM message_history WHERE chat_id = ?1",
            params![chat_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    pub fn delete_history(&self, chat_id: i64) -> BotResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM message_history WHERE chat_id = ?1",
            params![chat_id],
        )?;
        Ok(deleted)
    }

    /// Delete entries of every chat created strictly before `cutoff`.
    pub fn delete_history_before(&self, cutoff: DateTime<Utc>) -> BotResult<usize> {
        let conn = self.lock()?;
        let deleted = conn.execute(
            "DELETE FROM message_history WHERE created_at < ?1",
            params![to_db_time(&cutoff)],
        )?;
        Ok(deleted)
    }

    // --- Usage ---

    /// Table counts for the usage report. `messages_processed` is left at
    /// zero; it is a process counter, not something stored.
    pub fn usage_snapshot(&self) -> BotResult<UsageSnapshot> {
        let conn = self.lock()?;
        let (total_chats, enabled_chats): (i64, i64) = conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(active), 0) FROM chat_settings",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let stored_messages: i64 =
            conn.query_row("SELECT COUNT(*) FROM message_history", [], |row| row.get(0))?;

        let mut stmt = conn.prepare("SELECT chat_id, model FROM chat_settings ORDER BY chat_id")?;
        let chat_models = stmt
            .query_map([], |row| {
                Ok(ChatModel {
                    chat_id: row.get(0)?,
                    model: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(UsageSnapshot {
            total_chats,
            enabled_chats,
            stored_messages,
            messages_processed: 0,
            chat_models,
        })
    }

    #[cfg(test)]
    pub(crate) fn execute_batch(&self, sql: &str) -> BotResult<()> {
        self.lock()?.execute_batch(sql)?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps, so that comparing the stored text orders rows
/// chronologically.
fn to_db_time(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn from_db_time(s: &str) -> BotResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| BotError::StorageUnavailable(format!("bad timestamp {s:?}: {e}")))
}

struct ConfigRow {
    chat_id: i64,
    model: String,
    temperature: f64,
    max_tokens: u32,
    active: bool,
    system_prompt: String,
    updated_at: String,
}

impl ConfigRow {
    fn into_config(self) -> BotResult<ChatConfig> {
        Ok(ChatConfig {
            chat_id: self.chat_id,
            model: self.model,
            temperature: self.temperature as f32,
            max_tokens: self.max_tokens,
            enabled: self.active,
            system_prompt: self.system_prompt,
            updated_at: from_db_time(&self.updated_at)?,
        })
    }
}

struct HistoryRow {
    id: i64,
    chat_id: i64,
    role: String,
    content: String,
    created_at: String,
}

impl HistoryRow {
    fn into_entry(self) -> BotResult<HistoryEntry> {
        let role: Role = self
            .role
            .parse()
            .map_err(|e| BotError::StorageUnavailable(format!("{e}")))?;
        if role == Role::System {
            return Err(BotError::StorageUnavailable(format!(
                "history row {} has role \"system\"",
                self.id
            )));
        }
        Ok(HistoryEntry {
            id: self.id,
            chat_id: self.chat_id,
            role,
            content: self.content,
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_config_upsert_and_get() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_chat_config(42).unwrap().is_none());

        let mut cfg = ChatConfig::default_for(42, "prompt");
        db.upsert_chat_config(&cfg).unwrap();
        cfg.temperature = 0.25;
        cfg.enabled = false;
        db.upsert_chat_config(&cfg).unwrap();

        let stored = db.get_chat_config(42).unwrap().unwrap();
        assert_eq!(stored.temperature, 0.25);
        assert!(!stored.enabled);
        assert_eq!(stored.system_prompt, "prompt");
    }

    #[test]
    fn test_recent_history_keeps_newest_in_order() {
        let db = Database::open_in_memory().unwrap();
        let base = Utc::now() - Duration::minutes(10);
        for i in 0..5 {
            db.insert_history(7, Role::User, &format!("m{i}"), base + Duration::seconds(i))
                .unwrap();
        }
        let recent = db.recent_history(7, 3).unwrap();
        let contents: Vec<_> = recent.iter().map(|e| e.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);
    }

    #[test]
    fn test_identical_timestamps_fall_back_to_insert_order() {
        let db = Database::open_in_memory().unwrap();
        let now = Utc::now();
        db.insert_history(1, Role::User, "first", now).unwrap();
        db.insert_history(1, Role::Assistant, "second", now).unwrap();
        let recent = db.recent_history(1, 10).unwrap();
        assert_eq!(recent[0].content, "first");
        assert_eq!(recent[1].content, "second");
    }

    #[test]
    fn test_usage_snapshot_counts() {
        let db = Database::open_in_memory().unwrap();
        let mut a = ChatConfig::default_for(1, "");
        a.enabled = false;
        db.upsert_chat_config(&a).unwrap();
        db.upsert_chat_config(&ChatConfig::default_for(2, "")).unwrap();
        db.insert_history(2, Role::User, "hi", Utc::now()).unwrap();

        let snap = db.usage_snapshot().unwrap();
        assert_eq!(snap.total_chats, 2);
        assert_eq!(snap.enabled_chats, 1);
        assert_eq!(snap.stored_messages, 1);
        assert_eq!(snap.chat_models.len(), 2);
        assert_eq!(snap.chat_models[0].chat_id, 1);
    }

    #[test]
    fn test_db_time_is_fixed_width() {
        let a = Utc::now();
        let b = a + Duration::days(3);
        let (sa, sb) = (to_db_time(&a), to_db_time(&b));
        assert_eq!(sa.len(), sb.len());
        assert!(sa < sb);
        assert_eq!(to_db_time(&from_db_time(&sa).unwrap()), sa);
    }

    #[test]
    fn test_system_rows_are_rejected_on_read() {
        let db = Database::open_in_memory().unwrap();
        db.execute_batch(
            "INSERT INTO message_history (chat_id, role, content, created_at)
             VALUES (3, 'system', 'injected', '2024-01-01T00:00:00.000000Z');",
        )
        .unwrap();
        let err = db.recent_history(3, 10).unwrap_err();
        assert!(matches!(err, BotError::StorageUnavailable(_)));
    }
}
