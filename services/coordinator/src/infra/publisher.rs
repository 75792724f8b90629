use deadpool_redis::Pool;
use deadpool_redis::redis::{self, RedisError};
use tracing::info;

use crate::domain::repository::EventPublisher;
use crate::domain::types::OutboxMessage;
use crate::error::PublishError;
use crate::infra::cache::is_transient_redis;

/// Appends each message to a Redis stream with `XADD`.
///
/// Consumers dedupe on `(aggregate_id, sequence)`; redelivery after a crash
/// between `XADD` and `mark_published` is expected.
#[derive(Clone)]
pub struct RedisStreamPublisher {
    pub pool: Pool,
    pub stream: String,
    /// Approximate cap passed as `MAXLEN ~`.
    pub max_len: Option<u64>,
}

fn classify(err: RedisError) -> PublishError {
    if is_transient_redis(&err) {
        PublishError::Transient(err.to_string())
    } else {
        PublishError::Permanent(err.to_string())
    }
}

impl EventPublisher for RedisStreamPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| PublishError::Transient(e.to_string()))?;
        let payload = serde_json::to_string(&message.payload)
            .map_err(|e| PublishError::Permanent(e.to_string()))?;
        let headers = serde_json::to_string(&message.headers)
            .map_err(|e| PublishError::Permanent(e.to_string()))?;

        let mut cmd = redis::cmd("XADD");
        cmd.arg(&self.stream);
        if let Some(max_len) = self.max_len {
            cmd.arg("MAXLEN").arg("~").arg(max_len);
        }
        cmd.arg("*")
            .arg("id")
            .arg(message.id.to_string())
            .arg("event_type")
            .arg(&message.event_type)
            .arg("aggregate_type")
            .arg(&message.aggregate_type)
            .arg("aggregate_id")
            .arg(&message.aggregate_id)
            .arg("sequence")
            .arg(message.sequence)
            .arg("payload")
            .arg(payload)
            .arg("headers")
            .arg(headers);
        let _entry_id: String = cmd.query_async(&mut conn).await.map_err(classify)?;
        Ok(())
    }
}

/// Emits each message as a structured log event. Used when no broker is configured.
#[derive(Clone, Default)]
pub struct LogPublisher;

impl EventPublisher for LogPublisher {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        info!(
            message_id = %message.id,
            event_type = %message.event_type,
            aggregate_type = %message.aggregate_type,
            aggregate_id = %message.aggregate_id,
            sequence = message.sequence,
            payload = %message.payload,
            "outbox event published"
        );
        Ok(())
    }
}

/// Publisher chosen from configuration at startup.
#[derive(Clone)]
pub enum PublisherBackend {
    RedisStream(RedisStreamPublisher),
    Log(LogPublisher),
}

impl EventPublisher for PublisherBackend {
    async fn publish(&self, message: &OutboxMessage) -> Result<(), PublishError> {
        match self {
            Self::RedisStream(publisher) => publisher.publish(message).await,
            Self::Log(publisher) => publisher.publish(message).await,
        }
    }
}
