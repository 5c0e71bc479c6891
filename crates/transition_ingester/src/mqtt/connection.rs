use anyhow::{bail, Context, Result};
use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};
use std::time::Duration;

/// Connection settings for the MQTT broker
#[derive(Debug, Clone)]
pub struct MqttConnectionConfig {
    /// `mqtt://host:port`, `tcp://host:port` or `host[:port]`
    pub broker_url: String,
    pub client_id: String,
    /// Anonymous login when empty
    pub username: String,
    pub password: String,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    /// Capacity of the request queue between client handles and the event loop
    pub channel_capacity: usize,
}

impl Default for MqttConnectionConfig {
    fn default() -> Self {
        Self {
            broker_url: "mqtt://localhost:1883".to_string(),
            client_id: "trackbox-ingester".to_string(),
            username: String::new(),
            password: String::new(),
            keep_alive_secs: 30,
            clean_session: true,
            channel_capacity: 100,
        }
    }
}

/// Create an MQTT client handle and the event loop that drives it
///
/// Incoming publishes are acknowledged manually, after the message has been
/// processed, so that an interrupted run is redelivered by the broker.
pub fn create_mqtt_client(config: &MqttConnectionConfig) -> Result<(AsyncClient, EventLoop)> {
    let (host, port) = parse_broker_url(&config.broker_url)?;
    validate_client_id(&config.client_id)?;

    let mut mqtt_options = MqttOptions::new(&config.client_id, host, port);
    mqtt_options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));
    mqtt_options.set_clean_session(config.clean_session);
    mqtt_options.set_manual_acks(true);
    if !config.username.is_empty() {
        mqtt_options.set_credentials(&config.username, &config.password);
    }

    Ok(AsyncClient::new(mqtt_options, config.channel_capacity))
}

/// rumqttc panics on client ids that are empty or start with a space
fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.is_empty() || client_id.starts_with(' ') {
        bail!("Invalid MQTT client id: {:?}", client_id);
    }
    Ok(())
}

/// Parse broker URL in format mqtt://host:port or tcp://host:port or host:port
pub fn parse_broker_url(url: &str) -> Result<(&str, u16)> {
    let address = url
        .strip_prefix("mqtt://")
        .or_else(|| url.strip_prefix("tcp://"))
        .unwrap_or(url);

    match address.split_once(':') {
        None if !address.is_empty() => Ok((address, 1883)),
        Some((host, port)) if !host.is_empty() => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("Invalid port in broker URL: {}", port))?;
            Ok((host, port))
        }
        _ => bail!("Invalid broker URL format: {}", url),
    }
}

/// Map a numeric QoS level from configuration to the rumqttc type
pub fn parse_qos(level: u8) -> Result<QoS> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => bail!("Invalid MQTT QoS level: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_broker_url_with_port() {
        let (host, port) = parse_broker_url("mqtt://localhost:1883").unwrap();
        assert_eq!(host, "localhost");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_without_scheme() {
        let (host, port) = parse_broker_url("broker.example.com:8883").unwrap();
        assert_eq!(host, "broker.example.com");
        assert_eq!(port, 8883);
    }

    #[test]
    fn test_parse_broker_url_default_port() {
        let (host, port) = parse_broker_url("mqtt://broker.local").unwrap();
        assert_eq!(host, "broker.local");
        assert_eq!(port, 1883);
    }

    #[test]
    fn test_parse_broker_url_tcp_scheme() {
        let (host, port) = parse_broker_url("tcp://mqtt.example.com:1884").unwrap();
        assert_eq!(host, "mqtt.example.com");
        assert_eq!(port, 1884);
    }

    #[test]
    fn test_parse_broker_url_invalid_port() {
        assert!(parse_broker_url("mqtt://localhost:port").is_err());
        assert!(parse_broker_url("mqtt://localhost:70000").is_err());
    }

    #[test]
    fn test_parse_broker_url_empty_host() {
        assert!(parse_broker_url("mqtt://").is_err());
        assert!(parse_broker_url(":1883").is_err());
    }

    #[test]
    fn test_parse_qos() {
        assert_eq!(parse_qos(0).unwrap(), QoS::AtMostOnce);
        assert_eq!(parse_qos(1).unwrap(), QoS::AtLeastOnce);
        assert_eq!(parse_qos(2).unwrap(), QoS::ExactlyOnce);
        assert!(parse_qos(3).is_err());
    }

    #[test]
    fn test_create_mqtt_client_rejects_bad_url() {
        let config = MqttConnectionConfig {
            broker_url: "mqtt://localhost:notaport".to_string(),
            ..Default::default()
        };
        assert!(create_mqtt_client(&config).is_err());
    }

    #[test]
    fn test_create_mqtt_client_rejects_bad_client_id() {
        for client_id in ["", " trackbox"] {
            let config = MqttConnectionConfig {
                client_id: client_id.to_string(),
                ..Default::default()
            };
            let err = create_mqtt_client(&config)
                .err()
                .expect("client id should be rejected");
            assert!(err.to_string().contains("Invalid MQTT client id"));
        }
    }
}
