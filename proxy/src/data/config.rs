use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use tokio::net;

pub const DEFAULT_PORT: u16 = 87;
// Cloud IP of myimmerSUN.com
pub const DEFAULT_REMOTE_HOST: &str = "136.243.233.46";
pub const DEFAULT_SESSION_IDLE_SECS: u64 = 300;
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_MQTT_CLIENT: &str = "immersun2mqtt";
pub const DEFAULT_MQTT_BASE_TOPIC: &str = "raw/immersun/";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{key} has an invalid value: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("cannot resolve upstream {0}")]
    Unresolvable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MqttConfig {
    pub broker: String,
    pub port: u16,
    pub credentials: Option<(String, String)>,
    pub client_id: String,
    pub base_topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkConfig {
    Log,
    Mqtt(MqttConfig),
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub bind_address: IpAddr,
    pub bind_port: u16,
    pub remote_host: String,
    pub remote_port: u16,
    /// `None` keeps sessions until their socket fails.
    pub session_idle: Option<Duration>,
    pub sink: SinkConfig,
}

impl Config {
    pub fn from_env() -> Result<Config, ConfigError> {
        return Config::from_lookup(|key| std::env::var(key).ok());
    }

    /// Builds the configuration from any key lookup. Empty values count as
    /// unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Config, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let bind_address = parse_or(&get, "BIND_ADDRESS", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let bind_port = parse_or(&get, "BIND_PORT", DEFAULT_PORT)?;
        let remote_host = get("REMOTE_HOST").unwrap_or_else(|| DEFAULT_REMOTE_HOST.to_string());
        let remote_port = parse_or(&get, "REMOTE_PORT", DEFAULT_PORT)?;

        let idle_secs = parse_or(&get, "SESSION_IDLE_SECS", DEFAULT_SESSION_IDLE_SECS)?;
        let session_idle = match idle_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        let broker = get("MQTT_BROKER");
        let sink_kind = match get("SINK") {
            Some(kind) => kind.to_ascii_lowercase(),
            None if broker.is_some() => "mqtt".to_string(),
            None => "log".to_string(),
        };

        let sink = match sink_kind.as_str() {
            "log" => SinkConfig::Log,
            "mqtt" => {
                let broker = match broker {
                    Some(b) => b,
                    None => return Err(ConfigError::Missing("MQTT_BROKER")),
                };

                let credentials = match (get("MQTT_USER"), get("MQTT_PASSWORD")) {
                    (Some(user), Some(password)) => Some((user, password)),
                    (None, None) => None,
                    (Some(_), None) => return Err(ConfigError::Missing("MQTT_PASSWORD")),
                    (None, Some(_)) => return Err(ConfigError::Missing("MQTT_USER")),
                };

                SinkConfig::Mqtt(MqttConfig {
                    broker,
                    port: parse_or(&get, "MQTT_PORT", DEFAULT_MQTT_PORT)?,
                    credentials,
                    client_id: get("MQTT_CLIENT").unwrap_or_else(|| DEFAULT_MQTT_CLIENT.to_string()),
                    base_topic: get("MQTT_BASE_TOPIC")
                        .unwrap_or_else(|| DEFAULT_MQTT_BASE_TOPIC.to_string()),
                })
            }
            _ => {
                return Err(ConfigError::Invalid {
                    key: "SINK",
                    value: sink_kind.clone(),
                })
            }
        };

        return Ok(Config {
            bind_address,
            bind_port,
            remote_host,
            remote_port,
            session_idle,
            sink,
        });
    }

    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.bind_port)
    }

    /// Resolves the upstream endpoint once; every session targets the
    /// same address for the lifetime of the process.
    pub async fn resolve_upstream(&self) -> Result<SocketAddr, ConfigError> {
        let target = format!("{}:{}", self.remote_host, self.remote_port);

        let mut addrs = match net::lookup_host((self.remote_host.as_str(), self.remote_port)).await {
            Ok(a) => a,
            Err(_) => return Err(ConfigError::Unresolvable(target)),
        };

        match addrs.next() {
            Some(addr) => Ok(addr),
            None => Err(ConfigError::Unresolvable(target)),
        }
    }
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[]).unwrap();

        assert_eq!(config.bind_addr(), "0.0.0.0:87".parse().unwrap());
        assert_eq!(config.remote_host, DEFAULT_REMOTE_HOST);
        assert_eq!(config.remote_port, 87);
        assert_eq!(config.session_idle, Some(Duration::from_secs(300)));
        assert_eq!(config.sink, SinkConfig::Log);
    }

    #[test]
    fn test_broker_selects_mqtt() {
        let config = config(&[
            ("MQTT_BROKER", "mymqttbroker"),
            ("MQTT_USER", "immersunuser"),
            ("MQTT_PASSWORD", "secret"),
        ])
        .unwrap();

        assert_eq!(
            config.sink,
            SinkConfig::Mqtt(MqttConfig {
                broker: "mymqttbroker".to_string(),
                port: 1883,
                credentials: Some(("immersunuser".to_string(), "secret".to_string())),
                client_id: "immersun2mqtt".to_string(),
                base_topic: "raw/immersun/".to_string(),
            })
        );
    }

    #[test]
    fn test_overrides() {
        let config = config(&[
            ("BIND_ADDRESS", "172.16.40.81"),
            ("BIND_PORT", "8787"),
            ("REMOTE_HOST", "example.invalid"),
            ("REMOTE_PORT", "9000"),
            ("SESSION_IDLE_SECS", "0"),
            ("SINK", "LOG"),
            ("MQTT_BROKER", "ignored"),
        ])
        .unwrap();

        assert_eq!(config.bind_addr(), "172.16.40.81:8787".parse().unwrap());
        assert_eq!(config.remote_host, "example.invalid");
        assert_eq!(config.remote_port, 9000);
        assert_eq!(config.session_idle, None);
        assert_eq!(config.sink, SinkConfig::Log);
    }

    #[test]
    fn test_empty_values_are_unset() {
        let config = config(&[("BIND_PORT", ""), ("MQTT_BROKER", "  ")]).unwrap();

        assert_eq!(config.bind_port, 87);
        assert_eq!(config.sink, SinkConfig::Log);
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            config(&[("BIND_PORT", "99999")]),
            Err(ConfigError::Invalid {
                key: "BIND_PORT",
                value: "99999".to_string()
            })
        );
        assert!(matches!(
            config(&[("BIND_ADDRESS", "not-an-ip")]),
            Err(ConfigError::Invalid { key: "BIND_ADDRESS", .. })
        ));
        assert!(matches!(
            config(&[("SINK", "kafka")]),
            Err(ConfigError::Invalid { key: "SINK", .. })
        ));
    }

    #[test]
    fn test_mqtt_requirements() {
        assert_eq!(
            config(&[("SINK", "mqtt")]),
            Err(ConfigError::Missing("MQTT_BROKER"))
        );
        assert_eq!(
            config(&[("MQTT_BROKER", "b"), ("MQTT_USER", "u")]),
            Err(ConfigError::Missing("MQTT_PASSWORD"))
        );
    }

    #[tokio::test]
    async fn test_resolve_upstream() {
        let config = config(&[("REMOTE_HOST", "127.0.0.1"), ("REMOTE_PORT", "4000")]).unwrap();

        assert_eq!(
            config.resolve_upstream().await.unwrap(),
            "127.0.0.1:4000".parse().unwrap()
        );
    }
}
