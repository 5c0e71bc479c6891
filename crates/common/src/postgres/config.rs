use serde::{Deserialize, Serialize};
use std::time::Duration;

/// PostgreSQL configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub max_pool_size: usize,
    /// Upper bound for acquiring a connection and for any single statement
    pub statement_timeout_ms: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 5432,
            database: "trackbox".to_string(),
            username: "trackbox".to_string(),
            password: "trackbox".to_string(),
            max_pool_size: 5,
            statement_timeout_ms: 5000,
        }
    }
}

impl PostgresConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    /// Connection string in the `postgres://` URL form understood by goose
    pub fn dsn(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}?sslmode=disable",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}
