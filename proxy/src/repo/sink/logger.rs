use crate::repo::sink::base::{Sink, SinkError};

use async_trait::async_trait;

use log::info;

/// Writes readings to the log instead of a broker.
pub struct LogSink;

#[async_trait]
impl Sink for LogSink {
    async fn publish(&self, topic_suffix: &str, value: i32) -> Result<(), SinkError> {
        info!("{topic_suffix}: {value}");
        Ok(())
    }
}
