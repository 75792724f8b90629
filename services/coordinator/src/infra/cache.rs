use std::time::Duration;

use deadpool_redis::redis::{self, AsyncCommands, ErrorKind, RedisError, ServerErrorKind};
use deadpool_redis::{Pool, PoolError};
use serde_json::Value;

use crate::domain::repository::{DistributedLock, IdempotencyLedger};
use crate::domain::types::LockToken;
use crate::error::CoordinatorError;
use crate::infra::memory::{InMemoryLedger, InMemoryLock};

const RELEASE_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    return redis.call("DEL", KEYS[1])
end
return 0
"#;

const EXTEND_SCRIPT: &str = r#"
if redis.call("GET", KEYS[1]) == ARGV[1] then
    local remaining = redis.call("PTTL", KEYS[1])
    if remaining < 0 then remaining = 0 end
    return redis.call("PEXPIRE", KEYS[1], remaining + tonumber(ARGV[2]))
end
return 0
"#;

fn lock_key(key: &str) -> String {
    format!("lock:{key}")
}

fn ledger_key(operation_id: &str) -> String {
    format!("idempotency:{operation_id}")
}

fn millis(ttl: Duration) -> u64 {
    (ttl.as_millis() as u64).max(1)
}

/// Errors a later attempt can get past: lost connections, timeouts, and
/// servers that are loading, failing over or read-only.
pub(crate) fn is_transient_redis(err: &RedisError) -> bool {
    if err.is_timeout() || err.is_connection_dropped() || err.is_connection_refusal() {
        return true;
    }
    matches!(
        err.kind(),
        ErrorKind::Io
            | ErrorKind::ClusterConnectionNotFound
            | ErrorKind::Server(
                ServerErrorKind::BusyLoading
                    | ServerErrorKind::TryAgain
                    | ServerErrorKind::ClusterDown
                    | ServerErrorKind::MasterDown
                    | ServerErrorKind::ReadOnly
                    | ServerErrorKind::Moved
                    | ServerErrorKind::Ask
            )
    )
}

/// Cache outages are retryable for the caller; anything else is a bug.
fn cache_error(err: RedisError) -> CoordinatorError {
    if is_transient_redis(&err) {
        CoordinatorError::Transient(format!("cache unavailable: {err}"))
    } else {
        CoordinatorError::Internal(err.into())
    }
}

fn pool_error(err: PoolError) -> CoordinatorError {
    match err {
        PoolError::Backend(err) => cache_error(err),
        other => CoordinatorError::Transient(format!("cache pool: {other}")),
    }
}

// ── Lock ──────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedisLock {
    pub pool: Pool,
}

impl DistributedLock for RedisLock {
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CoordinatorError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;
        let token = LockToken::generate();
        let reply: Option<String> = redis::cmd("SET")
            .arg(lock_key(key))
            .arg(token.as_str())
            .arg("NX")
            .arg("PX")
            .arg(millis(ttl))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(reply.map(|_| token))
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, CoordinatorError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;
        let deleted: i64 = redis::cmd("EVAL")
            .arg(RELEASE_SCRIPT)
            .arg(1)
            .arg(lock_key(key))
            .arg(token.as_str())
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(deleted == 1)
    }

    async fn extend(
        &self,
        key: &str,
        token: &LockToken,
        additional: Duration,
    ) -> Result<bool, CoordinatorError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;
        let extended: i64 = redis::cmd("EVAL")
            .arg(EXTEND_SCRIPT)
            .arg(1)
            .arg(lock_key(key))
            .arg(token.as_str())
            .arg(millis(additional))
            .query_async(&mut conn)
            .await
            .map_err(cache_error)?;
        Ok(extended == 1)
    }

    async fn is_locked(&self, key: &str) -> Result<bool, CoordinatorError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;
        let exists: bool = conn
            .exists(lock_key(key))
            .await
            .map_err(cache_error)?;
        Ok(exists)
    }
}

// ── Ledger ────────────────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct RedisLedger {
    pub pool: Pool,
}

impl IdempotencyLedger for RedisLedger {
    async fn is_duplicate(&self, operation_id: &str) -> Result<bool, CoordinatorError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;
        let exists: bool = conn
            .exists(ledger_key(operation_id))
            .await
            .map_err(cache_error)?;
        Ok(exists)
    }

    async fn mark_completed(
        &self,
        operation_id: &str,
        result: &Value,
        ttl: Duration,
    ) -> Result<(), CoordinatorError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;
        let body = serde_json::to_string(result).map_err(|e| CoordinatorError::Internal(e.into()))?;
        let (): () = conn
            .set_ex(ledger_key(operation_id), body, ttl.as_secs().max(1))
            .await
            .map_err(cache_error)?;
        Ok(())
    }

    async fn cached_result(&self, operation_id: &str) -> Result<Option<Value>, CoordinatorError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(pool_error)?;
        let body: Option<String> = conn
            .get(ledger_key(operation_id))
            .await
            .map_err(cache_error)?;
        body.map(|b| serde_json::from_str(&b))
            .transpose()
            .map_err(|e| CoordinatorError::Internal(e.into()))
    }
}

// ── Backend selection ─────────────────────────────────────────────────────────

/// Lock backend, fixed when the process starts.
#[derive(Clone)]
pub enum LockBackend {
    Redis(RedisLock),
    InMemory(InMemoryLock),
}

impl DistributedLock for LockBackend {
    async fn try_acquire(
        &self,
        key: &str,
        ttl: Duration,
    ) -> Result<Option<LockToken>, CoordinatorError> {
        match self {
            Self::Redis(lock) => lock.try_acquire(key, ttl).await,
            Self::InMemory(lock) => lock.try_acquire(key, ttl).await,
        }
    }

    async fn release(&self, key: &str, token: &LockToken) -> Result<bool, CoordinatorError> {
        match self {
            Self::Redis(lock) => lock.release(key, token).await,
            Self::InMemory(lock) => lock.release(key, token).await,
        }
    }

    async fn extend(
        &self,
        key: &str,
        token: &LockToken,
        additional: Duration,
    ) -> Result<bool, CoordinatorError> {
        match self {
            Self::Redis(lock) => lock.extend(key, token, additional).await,
            Self::InMemory(lock) => lock.extend(key, token, additional).await,
        }
    }

    async fn is_locked(&self, key: &str) -> Result<bool, CoordinatorError> {
        match self {
            Self::Redis(lock) => lock.is_locked(key).await,
            Self::InMemory(lock) => lock.is_locked(key).await,
        }
    }
}

/// Ledger backend, fixed when the process starts.
#[derive(Clone)]
pub enum LedgerBackend {
    Redis(RedisLedger),
    InMemory(InMemoryLedger),
}

impl IdempotencyLedger for LedgerBackend {
    async fn is_duplicate(&self, operation_id: &str) -> Result<bool, CoordinatorError> {
        match self {
            Self::Redis(ledger) => ledger.is_duplicate(operation_id).await,
            Self::InMemory(ledger) => ledger.is_duplicate(operation_id).await,
        }
    }

    async fn mark_completed(
        &self,
        operation_id: &str,
        result: &Value,
        ttl: Duration,
    ) -> Result<(), CoordinatorError> {
        match self {
            Self::Redis(ledger) => ledger.mark_completed(operation_id, result, ttl).await,
            Self::InMemory(ledger) => ledger.mark_completed(operation_id, result, ttl).await,
        }
    }

    async fn cached_result(&self, operation_id: &str) -> Result<Option<Value>, CoordinatorError> {
        match self {
            Self::Redis(ledger) => ledger.cached_result(operation_id).await,
            Self::InMemory(ledger) => ledger.cached_result(operation_id).await,
        }
    }
}
