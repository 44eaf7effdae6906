//! Persistence seams for tokens and users, plus the in-memory backend.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use super::token::{AuthToken, Scope, TokenHash};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,

    #[error("store backend failure: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub activated: bool,
}

#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Token with this hash and scope, expired or not.
    async fn find_token_by_hash(
        &self,
        hash: &TokenHash,
        scope: Scope,
    ) -> Result<Option<AuthToken>, StoreError>;

    async fn insert_token(&self, token: AuthToken) -> Result<(), StoreError>;

    /// Delete every `scope` token owned by `user_id`, returning how many.
    async fn delete_tokens_for_user(&self, user_id: i64, scope: Scope) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with [`StoreError::NotFound`] for an unknown id.
    async fn find_user(&self, user_id: i64) -> Result<User, StoreError>;

    async fn set_activated(&self, user_id: i64) -> Result<User, StoreError>;
}

/// Concurrent in-memory store used by the binary and tests.
#[derive(Default)]
pub struct MemoryStore {
    tokens: DashMap<TokenHash, AuthToken>,
    users: DashMap<i64, User>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user: User) {
        self.users.insert(user.id, user);
    }

    pub fn token_count(&self) -> usize {
        self.tokens.len()
    }

    /// Drop every token expired at `now`. Returns how many were removed.
    pub fn purge_expired(&self, now: SystemTime) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, token| !token.is_expired_at(now));
        before.saturating_sub(self.tokens.len())
    }

    /// Purge expired tokens every `interval` until `shutdown` fires.
    pub fn spawn_purger(
        self: &Arc<Self>,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let purged = store.purge_expired(SystemTime::now());
                        if purged > 0 {
                            tracing::info!(purged, "Purged expired tokens");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    }
}

#[async_trait]
impl TokenStore for MemoryStore {
    async fn find_token_by_hash(
        &self,
        hash: &TokenHash,
        scope: Scope,
    ) -> Result<Option<AuthToken>, StoreError> {
        Ok(self
            .tokens
            .get(hash)
            .filter(|token| token.scope == scope)
            .map(|token| token.clone()))
    }

    async fn insert_token(&self, token: AuthToken) -> Result<(), StoreError> {
        self.tokens.insert(token.hash, token);
        Ok(())
    }

    async fn delete_tokens_for_user(&self, user_id: i64, scope: Scope) -> Result<u64, StoreError> {
        let before = self.tokens.len();
        self.tokens
            .retain(|_, token| !(token.user_id == user_id && token.scope == scope));
        Ok(before.saturating_sub(self.tokens.len()) as u64)
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_user(&self, user_id: i64) -> Result<User, StoreError> {
        self.users
            .get(&user_id)
            .map(|user| user.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn set_activated(&self, user_id: i64) -> Result<User, StoreError> {
        let mut user = self.users.get_mut(&user_id).ok_or(StoreError::NotFound)?;
        user.activated = true;
        Ok(user.clone())
    }
}
