use std::future::Future;
use std::pin::Pin;

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tracing::warn;

use rotation_core::retry::RetryPolicy;

use crate::error::CoordinatorError;

/// Future returned by a transaction body; borrows the transaction for `'c`.
pub type TxFuture<'c, T> = Pin<Box<dyn Future<Output = Result<T, CoordinatorError>> + Send + 'c>>;

/// Atomic unit of work over the relational store.
///
/// Bodies receive a `&DatabaseTransaction` and must route every write through
/// it; outbox inserts only accept a transaction for the same reason.
#[derive(Clone)]
pub struct TransactionScope {
    db: DatabaseConnection,
}

impl TransactionScope {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Begin, run `body`, commit on `Ok`, roll back on `Err`.
    pub async fn run<T, F>(&self, body: F) -> Result<T, CoordinatorError>
    where
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> TxFuture<'c, T>,
        T: Send,
    {
        let txn = self.db.begin().await?;
        let result = body(&txn).await;
        finish(txn, result).await
    }

    /// Run `body` inside a savepoint of `txn`. A failure undoes only the nested
    /// work; `txn` stays usable and the error is handed back.
    pub async fn run_nested<T, F>(txn: &DatabaseTransaction, body: F) -> Result<T, CoordinatorError>
    where
        F: for<'c> FnOnce(&'c DatabaseTransaction) -> TxFuture<'c, T>,
        T: Send,
    {
        let savepoint = txn.begin().await?;
        let result = body(&savepoint).await;
        finish(savepoint, result).await
    }

    /// Re-run the whole scope from scratch while it fails transiently.
    ///
    /// Non-transient errors are returned as-is. After `policy.max_attempts`
    /// transient failures the last one is wrapped in `RetryExhausted`.
    pub async fn run_with_retry<T, F>(
        &self,
        policy: &RetryPolicy,
        body: F,
    ) -> Result<T, CoordinatorError>
    where
        F: for<'c> Fn(&'c DatabaseTransaction) -> TxFuture<'c, T>,
        T: Send,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run(&body).await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient() => {
                    if !policy.allows_another(attempt) {
                        return Err(CoordinatorError::RetryExhausted {
                            attempts: attempt,
                            last_error: err.to_string(),
                        });
                    }
                    let delay = policy.backoff(attempt);
                    warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient transaction failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

async fn finish<T>(
    txn: DatabaseTransaction,
    result: Result<T, CoordinatorError>,
) -> Result<T, CoordinatorError> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback_err) = txn.rollback().await {
                warn!(error = %rollback_err, "rollback failed");
            }
            Err(err)
        }
    }
}
