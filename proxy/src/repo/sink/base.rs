use async_trait::async_trait;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink connection error: {0}")]
    Connection(String),
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },
}

/// Destination for decoded readings.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Publishes one value under `topic_suffix` (e.g. `"1234/generating/power"`).
    async fn publish(&self, topic_suffix: &str, value: i32) -> Result<(), SinkError>;

    async fn close(&self) -> Result<(), SinkError> {
        Ok(())
    }
}
