//! External durable log sink.
//!
//! Every published message is forwarded to an [`EventSink`] keyed by its
//! message id. Sink failures are logged by the bus and never propagated to
//! publishers; the sink is the durability story, not the delivery path.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Transport contract for the durable log
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Append one record to the named topic. `key` is the message id.
    async fn send(&self, topic: &str, key: &str, payload: String) -> Result<()>;
}

/// Sink that writes records to the tracing log and otherwise discards them
///
/// The default when no external transport is configured.
#[derive(Debug, Default, Clone)]
pub struct LoggingSink;

#[async_trait]
impl EventSink for LoggingSink {
    async fn send(&self, topic: &str, key: &str, payload: String) -> Result<()> {
        tracing::debug!(topic, key, bytes = payload.len(), "sink record");
        Ok(())
    }
}

/// One record captured by [`MemorySink`]
#[derive(Debug, Clone)]
pub struct SinkRecord {
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub received_at: DateTime<Utc>,
}

/// In-memory sink that retains every record it receives
///
/// Used in tests and local runs to observe the external fan-out.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<SinkRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<SinkRecord> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn send(&self, topic: &str, key: &str, payload: String) -> Result<()> {
        let mut records = self.records.lock().await;
        records.push(SinkRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload,
            received_at: Utc::now(),
        });
        Ok(())
    }
}
