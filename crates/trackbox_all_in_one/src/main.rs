mod config;

use common::postgres::{PostgresClient, PostgresGeofenceEventRepository, PostgresMigrationRunner};
use common::telemetry::{TelemetryConfig, init_telemetry, shutdown_telemetry};
use config::ServiceConfig;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use trackbox_runner::Runner;
use transition_ingester::TransitionIngester;

#[tokio::main]
async fn main() -> ExitCode {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let telemetry_providers = match init_telemetry(&TelemetryConfig {
        service_name: config.otel_service_name.clone(),
        otel_endpoint: config.otel_endpoint.clone(),
        otel_enabled: config.otel_enabled,
        log_level: config.log_level.clone(),
    }) {
        Ok(providers) => providers,
        Err(e) => {
            eprintln!("Failed to initialize telemetry: {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!(
        otel_enabled = config.otel_enabled,
        mqtt_broker_url = %config.mqtt_broker_url,
        subscribe_topic = %config.mqtt_subscribe_topic,
        "Starting trackbox-all-in-one service"
    );

    let result = run(config).await;

    // Shutdown telemetry and flush pending traces and logs
    shutdown_telemetry(telemetry_providers);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("trackbox-all-in-one failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let event_repository = initialize_event_store(&config)
        .await
        .inspect_err(|e| error!("Failed to initialize event store: {:#}", e))?;

    let ingester =
        TransitionIngester::new(event_repository, config.transition_ingester())
            .inspect_err(|e| error!("Failed to initialize transition ingester: {:#}", e))?;

    Runner::new()
        .with_named_process("transition_ingester", ingester.into_runner_process())
        .with_shutdown_timeout(Duration::from_secs(config.shutdown_drain_timeout_secs + 5))
        .with_closer(|| async {
            info!("Cleanup complete");
            Ok(())
        })
        .with_closer_timeout(Duration::from_secs(10))
        .run()
        .await
}

async fn initialize_event_store(
    config: &ServiceConfig,
) -> anyhow::Result<Arc<PostgresGeofenceEventRepository>> {
    info!("Initializing PostgreSQL...");
    let postgres_config = config.postgres();
    let startup_timeout = Duration::from_secs(config.startup_timeout_secs);

    let migration_runner = PostgresMigrationRunner::new(
        config.postgres_goose_binary_path.clone(),
        config.postgres_migrations_dir.clone(),
        &postgres_config,
    );
    within_startup_timeout(
        startup_timeout,
        "running PostgreSQL migrations",
        migration_runner.run_migrations(),
    )
    .await?;

    let client = PostgresClient::new(&postgres_config)?;
    within_startup_timeout(startup_timeout, "connecting to PostgreSQL", client.ping()).await?;

    Ok(Arc::new(PostgresGeofenceEventRepository::new(client)))
}

async fn within_startup_timeout<T>(
    timeout: Duration,
    step: &str,
    fut: impl Future<Output = anyhow::Result<T>>,
) -> anyhow::Result<T> {
    tokio::time::timeout(timeout, fut)
        .await
        .map_err(|_| anyhow::anyhow!("Timed out after {:?} {}", timeout, step))?
}
