use common::postgres::PostgresConfig;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use transition_ingester::mqtt::MqttConnectionConfig;
use transition_ingester::TransitionIngesterConfig;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServiceConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    // MQTT configuration
    /// Broker URL (mqtt://host:port, tcp://host:port or host:port)
    #[serde(default = "default_mqtt_broker_url")]
    pub mqtt_broker_url: String,

    #[serde(default = "default_mqtt_client_id")]
    pub mqtt_client_id: String,

    /// Username for the broker; anonymous when empty
    #[serde(default)]
    pub mqtt_username: String,

    #[serde(default)]
    pub mqtt_password: String,

    /// Topic filter for tracker transition events
    #[serde(default = "default_mqtt_subscribe_topic")]
    pub mqtt_subscribe_topic: String,

    /// QoS level for the subscription (0, 1 or 2)
    #[serde(default = "default_mqtt_subscribe_qos")]
    pub mqtt_subscribe_qos: u8,

    #[serde(default = "default_mqtt_keep_alive_secs")]
    pub mqtt_keep_alive_secs: u64,

    /// Start a fresh broker session on every connect
    #[serde(default = "default_mqtt_clean_session")]
    pub mqtt_clean_session: bool,

    #[serde(default = "default_mqtt_channel_capacity")]
    pub mqtt_channel_capacity: usize,

    #[serde(default = "default_mqtt_reconnect_delay_secs")]
    pub mqtt_reconnect_delay_secs: u64,

    // Change notification configuration
    /// Notifications go to `{prefix}/{subject_id}/events`
    #[serde(default = "default_notification_topic_prefix")]
    pub notification_topic_prefix: String,

    #[serde(default = "default_notification_timeout_ms")]
    pub notification_timeout_ms: u64,

    // PostgreSQL configuration
    #[serde(default = "default_postgres_host")]
    pub postgres_host: String,

    #[serde(default = "default_postgres_port")]
    pub postgres_port: u16,

    #[serde(default = "default_postgres_database")]
    pub postgres_database: String,

    #[serde(default = "default_postgres_username")]
    pub postgres_username: String,

    #[serde(default = "default_postgres_password")]
    pub postgres_password: String,

    #[serde(default = "default_postgres_max_pool_size")]
    pub postgres_max_pool_size: usize,

    /// Bound on connection acquisition and on each statement
    #[serde(default = "default_postgres_statement_timeout_ms")]
    pub postgres_statement_timeout_ms: u64,

    /// Path to PostgreSQL migrations directory
    #[serde(default = "default_postgres_migrations_dir")]
    pub postgres_migrations_dir: String,

    /// Path to goose binary
    #[serde(default = "default_postgres_goose_binary_path")]
    pub postgres_goose_binary_path: String,

    // Lifecycle configuration
    /// Startup timeout for initialization operations in seconds
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,

    /// How long in-flight messages may take to finish on shutdown
    #[serde(default = "default_shutdown_drain_timeout_secs")]
    pub shutdown_drain_timeout_secs: u64,

    // OpenTelemetry configuration
    /// OpenTelemetry OTLP endpoint (gRPC)
    #[serde(default = "default_otel_endpoint")]
    pub otel_endpoint: String,

    /// Enable OpenTelemetry export
    #[serde(default = "default_otel_enabled")]
    pub otel_enabled: bool,

    /// Service name for OpenTelemetry resource
    #[serde(default = "default_otel_service_name")]
    pub otel_service_name: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

// MQTT defaults
fn default_mqtt_broker_url() -> String {
    "mqtt://localhost:1883".to_string()
}

fn default_mqtt_client_id() -> String {
    "trackbox-ingester".to_string()
}

fn default_mqtt_subscribe_topic() -> String {
    "owntracks/+/+/event".to_string()
}

fn default_mqtt_subscribe_qos() -> u8 {
    2
}

fn default_mqtt_keep_alive_secs() -> u64 {
    30
}

fn default_mqtt_clean_session() -> bool {
    true
}

fn default_mqtt_channel_capacity() -> usize {
    100
}

fn default_mqtt_reconnect_delay_secs() -> u64 {
    5
}

// Notification defaults
fn default_notification_topic_prefix() -> String {
    "trackbox".to_string()
}

fn default_notification_timeout_ms() -> u64 {
    5000
}

// PostgreSQL defaults
fn default_postgres_host() -> String {
    "localhost".to_string()
}

fn default_postgres_port() -> u16 {
    5432
}

fn default_postgres_database() -> String {
    "trackbox".to_string()
}

fn default_postgres_username() -> String {
    "trackbox".to_string()
}

fn default_postgres_password() -> String {
    "trackbox".to_string()
}

fn default_postgres_max_pool_size() -> usize {
    5
}

fn default_postgres_statement_timeout_ms() -> u64 {
    5000
}

fn default_postgres_migrations_dir() -> String {
    "crates/common/migrations/postgres".to_string()
}

fn default_postgres_goose_binary_path() -> String {
    "goose".to_string()
}

fn default_startup_timeout_secs() -> u64 {
    30
}

fn default_shutdown_drain_timeout_secs() -> u64 {
    10
}

// OpenTelemetry defaults
fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_enabled() -> bool {
    false
}

fn default_otel_service_name() -> String {
    "trackbox-all-in-one".to_string()
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(Environment::with_prefix("TRACKBOX"))
            .build()?
            .try_deserialize()
    }

    pub fn postgres(&self) -> PostgresConfig {
        PostgresConfig {
            host: self.postgres_host.clone(),
            port: self.postgres_port,
            database: self.postgres_database.clone(),
            username: self.postgres_username.clone(),
            password: self.postgres_password.clone(),
            max_pool_size: self.postgres_max_pool_size,
            statement_timeout_ms: self.postgres_statement_timeout_ms,
        }
    }

    pub fn transition_ingester(&self) -> TransitionIngesterConfig {
        TransitionIngesterConfig {
            mqtt: MqttConnectionConfig {
                broker_url: self.mqtt_broker_url.clone(),
                client_id: self.mqtt_client_id.clone(),
                username: self.mqtt_username.clone(),
                password: self.mqtt_password.clone(),
                keep_alive_secs: self.mqtt_keep_alive_secs,
                clean_session: self.mqtt_clean_session,
                channel_capacity: self.mqtt_channel_capacity,
            },
            subscribe_topic: self.mqtt_subscribe_topic.clone(),
            subscribe_qos: self.mqtt_subscribe_qos,
            reconnect_delay_secs: self.mqtt_reconnect_delay_secs,
            notification_topic_prefix: self.notification_topic_prefix.clone(),
            notification_timeout_ms: self.notification_timeout_ms,
            shutdown_drain_timeout_secs: self.shutdown_drain_timeout_secs,
        }
    }
}
