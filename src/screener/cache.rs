//! Read-through cache of user profiles for chat-facing lookups.
//!
//! Entries become stale whenever a pass recomputes totals, so the pipeline
//! invalidates every user it wrote.

use anyhow::Result;
use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

use crate::screener::storage::ScreeningStorage;
use crate::screener::types::UserRecord;
use crate::types::ChatId;

#[derive(Clone)]
pub struct UserCache {
    cache: Cache<ChatId, UserRecord>,
}

impl UserCache {
    pub fn new(capacity: u64, ttl_seconds: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(capacity)
            .time_to_live(Duration::from_secs(ttl_seconds))
            .build();
        Self { cache }
    }

    pub async fn get(&self, chat_id: ChatId) -> Option<UserRecord> {
        self.cache.get(&chat_id).await
    }

    /// Cached profile, loaded from storage on a miss. Unknown users are not cached.
    pub async fn get_or_load(
        &self,
        chat_id: ChatId,
        storage: &dyn ScreeningStorage,
    ) -> Result<Option<UserRecord>> {
        if let Some(user) = self.cache.get(&chat_id).await {
            return Ok(Some(user));
        }

        let user = storage.find_user(chat_id).await?;
        if let Some(user) = &user {
            self.cache.insert(chat_id, user.clone()).await;
        }
        Ok(user)
    }

    pub async fn invalidate(&self, chat_id: ChatId) {
        self.cache.invalidate(&chat_id).await;
    }

    /// Drop every entry for the given users.
    pub async fn invalidate_users(&self, users: &[UserRecord]) {
        for user in users {
            self.cache.invalidate(&user.chat_id).await;
        }
        debug!("Invalidated {} cached user profiles", users.len());
    }
}
