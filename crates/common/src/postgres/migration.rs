use crate::postgres::PostgresConfig;
use anyhow::{bail, Context, Result};
use tokio::process::Command;
use tracing::{debug, info};

/// Applies the goose migrations that create the event store schema.
///
/// Runs `goose -dir {migrations_dir} postgres {dsn} up` as a subprocess.
pub struct PostgresMigrationRunner {
    goose_binary_path: String,
    migrations_dir: String,
    dsn: String,
}

impl PostgresMigrationRunner {
    pub fn new(goose_binary_path: String, migrations_dir: String, config: &PostgresConfig) -> Self {
        Self {
            goose_binary_path,
            migrations_dir,
            dsn: config.dsn(),
        }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        info!(migrations_dir = %self.migrations_dir, "running PostgreSQL migrations");

        let output = Command::new(&self.goose_binary_path)
            .args(["-dir", &self.migrations_dir, "postgres", &self.dsn, "up"])
            .kill_on_drop(true)
            .output()
            .await
            .context("Failed to execute goose command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            bail!("Migration failed:\nSTDOUT: {}\nSTDERR: {}", stdout, stderr);
        }

        debug!(output = %String::from_utf8_lossy(&output.stdout), "goose output");
        info!("migrations completed successfully");

        Ok(())
    }
}
