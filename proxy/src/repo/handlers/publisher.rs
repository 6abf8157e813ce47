use crate::repo::sink::base::Sink;

use common_data::relay::data::telemetry::DecodedReading;

use log::error;

use tokio::sync::mpsc::Receiver;

/// Capacity of the queue between the multiplexer and the publisher.
pub const READING_QUEUE: usize = 100;

/// Publishes every reading received until the multiplexer goes away, then
/// hands the sink back so the caller can close it.
pub async fn publish_readings(
    sink: Box<dyn Sink>,
    mut readings: Receiver<DecodedReading>,
) -> Box<dyn Sink> {
    while let Some(reading) = readings.recv().await {
        publish_reading(sink.as_ref(), &reading).await;
    }

    sink
}

/// Publishes the four values of one reading. Failures are logged and not
/// retried; returns how many publishes failed.
pub async fn publish_reading(sink: &dyn Sink, reading: &DecodedReading) -> usize {
    let mut failures = 0;

    for (topic, value) in reading.topics() {
        if let Err(err) = sink.publish(&topic, value).await {
            error!("Error publishing reading from {}: {err}", reading.serial_number);
            failures += 1;
        }
    }

    failures
}
