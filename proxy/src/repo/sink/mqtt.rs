use crate::data::config::MqttConfig;
use crate::repo::sink::base::{Sink, SinkError};

use std::time::Duration;

use async_trait::async_trait;

use log::{error, info};

use rumqttc::{AsyncClient, Event, MqttOptions, Outgoing, Packet, QoS};

use tokio::task::JoinHandle;
use tokio::time;

const REQUEST_QUEUE: usize = 100;
const KEEP_ALIVE: Duration = Duration::from_secs(60);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
const CLOSE_POLL: Duration = Duration::from_millis(50);

/// Publishes each value as a plain decimal payload, QoS 0, not retained.
pub struct MqttSink {
    client: AsyncClient,
    base_topic: String,
    connection: JoinHandle<()>,
}

impl MqttSink {
    /// Starts the client. The connection is made (and remade) in the
    /// background; publishes made while it is down queue in the client.
    pub fn connect(config: &MqttConfig) -> MqttSink {
        let mut options = MqttOptions::new(config.client_id.clone(), config.broker.clone(), config.port);
        options.set_keep_alive(KEEP_ALIVE);

        if let Some((user, password)) = &config.credentials {
            options.set_credentials(user.clone(), password.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(options, REQUEST_QUEUE);
        let broker = format!("{}:{}", config.broker, config.port);

        let connection = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker {broker}")
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        info!("Disconnected from MQTT broker {broker}");
                        break;
                    }
                    Ok(_) => {}
                    Err(err) => {
                        error!("MQTT connection to {broker} failed: {err}");
                        time::sleep(RECONNECT_DELAY).await;
                    }
                }
            }
        });

        return MqttSink {
            client,
            base_topic: config.base_topic.clone(),
            connection,
        };
    }
}

pub fn full_topic(base_topic: &str, topic_suffix: &str) -> String {
    format!("{base_topic}{topic_suffix}")
}

#[async_trait]
impl Sink for MqttSink {
    async fn publish(&self, topic_suffix: &str, value: i32) -> Result<(), SinkError> {
        let topic = full_topic(&self.base_topic, topic_suffix);

        self.client
            .try_publish(topic.clone(), QoS::AtMostOnce, false, value.to_string())
            .map_err(|err| SinkError::Publish {
                topic,
                reason: err.to_string(),
            })
    }

    async fn close(&self) -> Result<(), SinkError> {
        // The request queue stays full while the broker is unreachable, so
        // never wait on it.
        let result = self
            .client
            .try_disconnect()
            .map_err(|err| SinkError::Connection(err.to_string()));

        if result.is_ok() {
            let deadline = time::Instant::now() + CLOSE_TIMEOUT;
            while !self.connection.is_finished() && time::Instant::now() < deadline {
                time::sleep(CLOSE_POLL).await;
            }
        }

        self.connection.abort();

        result
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.connection.abort();
    }
}
