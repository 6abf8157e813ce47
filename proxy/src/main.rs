mod data;
mod repo;

use data::config::{Config, SinkConfig};
use repo::handlers::publisher::{self, READING_QUEUE};
use repo::handlers::udphandler::Multiplexer;
use repo::sink::base::Sink;
use repo::sink::logger::LogSink;
use repo::sink::mqtt::MqttSink;

use std::error::Error;
use std::future;

use log::{error, info, warn};

use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // A missing .env file is fine; the environment may already be set.
    let _ = dotenvy::dotenv();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::from_env()?;
    let upstream = config.resolve_upstream().await?;

    let sink: Box<dyn Sink> = match &config.sink {
        SinkConfig::Log => Box::new(LogSink),
        SinkConfig::Mqtt(mqtt) => {
            info!("Connecting to MQTT server {}:{}...", mqtt.broker, mqtt.port);
            Box::new(MqttSink::connect(mqtt))
        }
    };

    let (readings_tx, readings_rx) = mpsc::channel(READING_QUEUE);
    let publisher = tokio::spawn(publisher::publish_readings(sink, readings_rx));

    info!("Starting datagram proxy...");
    let multiplexer = Multiplexer::bind(config.bind_addr(), upstream)
        .await?
        .with_idle_timeout(config.session_idle)
        .with_readings(readings_tx);

    info!(
        "Datagram proxy is running on {}, forwarding to {upstream}",
        multiplexer.local_addr()?
    );

    let stats = multiplexer
        .run(async {
            if let Err(err) = signal::ctrl_c().await {
                error!("cannot listen for shutdown signal: {err}");
                future::pending::<()>().await;
            }
        })
        .await;

    info!("Closing transport... {stats:?}");

    match publisher.await {
        Ok(sink) => {
            if let Err(err) = sink.close().await {
                warn!("{err}");
            }
        }
        Err(err) => error!("publisher task failed: {err}"),
    }

    Ok(())
}
