//! Per-chat mutual exclusion for history read-modify-write sequences.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per chat that currently has a holder or a waiter.
/// Entries are dropped as soon as the last user releases them, so the map
/// only grows with concurrent activity.
#[derive(Default)]
pub struct ChatLocks {
    locks: DashMap<i64, Arc<Mutex<()>>>,
}

/// Held while a chat's history is read or written.
pub struct ChatGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    chat_id: i64,
    locks: &'a DashMap<i64, Arc<Mutex<()>>>,
}

impl ChatLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the chat's lock. Chats never block each other.
    pub async fn lock(&self, chat_id: i64) -> ChatGuard<'_> {
        // Clone out of the map so no shard guard is held across the await.
        let lock = Arc::clone(self.locks.entry(chat_id).or_default().value());
        ChatGuard {
            guard: Some(lock.lock_owned().await),
            chat_id,
            locks: &self.locks,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.len()
    }
}

impl Drop for ChatGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left means nobody holds or awaits it.
        // `lock` clones under the same shard lock, so this cannot race it.
        self.locks
            .remove_if(&self.chat_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn same_chat_is_serialized() {
        let locks = ChatLocks::new();
        let guard = locks.lock(1).await;
        let second = tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await;
        assert!(second.is_err());
        drop(guard);
        assert!(tokio::time::timeout(Duration::from_millis(50), locks.lock(1)).await.is_ok());
    }

    #[tokio::test]
    async fn different_chats_do_not_block() {
        let locks = ChatLocks::new();
        let _a = locks.lock(1).await;
        assert!(tokio::time::timeout(Duration::from_millis(50), locks.lock(2)).await.is_ok());
    }

    #[tokio::test]
    async fn released_chats_are_forgotten() {
        let locks = ChatLocks::new();
        for chat_id in 0..100 {
            let _guard = locks.lock(chat_id).await;
            assert_eq!(locks.len(), 1);
        }
        assert_eq!(locks.len(), 0);
    }

    #[tokio::test]
    async fn entry_outlives_holder_while_someone_waits() {
        let locks = ChatLocks::new();
        let first = locks.lock(7).await;
        let waiter = locks.lock(7);
        tokio::pin!(waiter);
        assert!(tokio::time::timeout(Duration::from_millis(20), waiter.as_mut())
            .await
            .is_err());

        drop(first);
        assert_eq!(locks.len(), 1);

        let second = waiter.await;
        assert_eq!(locks.len(), 1);
        drop(second);
        assert_eq!(locks.len(), 0);
    }
}
