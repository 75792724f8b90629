//! In-process lock and ledger for single-node deployments and tests.
//!
//! Expiry uses `tokio::time::Instant`, so paused-clock tests can step past TTLs.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::domain::repository::{DistributedLock, IdempotencyLedger};
use crate::domain::types::LockToken;
use crate::error::CoordinatorError;

#[derive(Clone, Default)]
pub struct InMemoryLock {
    entries: Arc<Mutex<HashMap<String, (LockToken, Instant)>>>,
}

impl InMemoryLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DistributedLock for InMemoryLock {
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CoordinatorError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        if entries.contains_key(key) {
            return Ok(None);
        }
        let token = LockToken::generate();
        entries.insert(key.to_owned(), (token.clone(), now + ttl));
        Ok(Some(token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, CoordinatorError> {
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some((held, _)) if held == token => {
                entries.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn extend(
        &self,
        key: &str,
        token: &LockToken,
        additional: Duration,
    ) -> Result<bool, CoordinatorError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get_mut(key) {
            Some((held, expires_at)) if held == token && *expires_at > now => {
                *expires_at += additional;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn is_locked(&self, key: &str) -> Result<bool, CoordinatorError> {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        Ok(entries
            .get(key)
            .is_some_and(|(_, expires_at)| *expires_at > now))
    }
}

#[derive(Clone, Default)]
pub struct InMemoryLedger {
    entries: Arc<Mutex<HashMap<String, (Value, Instant)>>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdempotencyLedger for InMemoryLedger {
    async fn is_duplicate(&self, operation_id: &str) -> Result<bool, CoordinatorError> {
        Ok(self.cached_result(operation_id).await?.is_some())
    }

    async fn mark_completed(
        &self,
        operation_id: &str,
        result: &Value,
        ttl: Duration,
    ) -> Result<(), CoordinatorError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, (_, expires_at)| *expires_at > now);
        entries.insert(operation_id.to_owned(), (result.clone(), now + ttl));
        Ok(())
    }

    async fn cached_result(&self, operation_id: &str) -> Result<Option<Value>, CoordinatorError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(operation_id) {
            Some((value, expires_at)) if *expires_at > now => Ok(Some(value.clone())),
            Some(_) => {
                entries.remove(operation_id);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}
