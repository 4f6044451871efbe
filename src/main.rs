use anyhow::Result;
use std::sync::Arc;

use apartment_radar::api::{ApartmentProvider, SsgeClient};
use apartment_radar::core::{self, Config, HealthChecker};
use apartment_radar::dispatch::Orchestrator;
use apartment_radar::domain::Filter;
use apartment_radar::filters::FilterRegistry;
use apartment_radar::scanner::ApartmentScanner;
use apartment_radar::storage::{SqliteStorage, Storage};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    core::logging::init_logging(&config.server.log_level);

    tracing::info!("🚀 Apartment Radar starting...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));

    // Initialize health checker
    let health_checker = Arc::new(HealthChecker::new());

    // Start health check endpoint
    let health_clone = health_checker.clone();
    let health_port = config.server.health_port;
    tokio::spawn(async move { start_health_server(health_clone, health_port).await });
    tracing::info!("✅ Health endpoint running on port {}", health_port);

    // Storage
    let storage: Arc<dyn Storage> = Arc::new(SqliteStorage::new(&config.database.sqlite_path).await?);
    health_checker.update_component("database", true).await;

    // Listing provider
    let client = Arc::new(SsgeClient::new(&config)?);
    client.start(config.provider.token_refresh_interval).await?;
    health_checker.update_component("provider", true).await;
    let provider: Arc<dyn ApartmentProvider> = client.clone();

    // Already-persisted ads were announced previously; pre-mark them so
    // the scanner does not re-emit them after a restart.
    let mut stored = storage.apartments(&Filter::default()).await?;
    let mut seeded = 0usize;
    while let Some(apartment) = stored.recv().await {
        provider.mark_seen(apartment.id);
        seeded += 1;
    }
    tracing::info!("Seeded seen-cache with {} stored apartments", seeded);

    // Pipeline
    let registry = Arc::new(FilterRegistry::new(storage.clone()).await?);
    let (scanner, apartment_rx) = ApartmentScanner::new(provider.clone(), &config);
    let scanner = Arc::new(scanner);

    let orchestrator = Arc::new(Orchestrator::new(
        storage.clone(),
        provider.clone(),
        registry,
        &config,
    ));
    orchestrator.start(apartment_rx).await?;

    if config.server.refresh_on_start {
        tracing::info!("♻️ Purging stored apartments for a full rebuild");
        orchestrator.refresh_all(scanner.fetch_all()).await?;
    }

    scanner.start(config.provider.poll_interval);

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down...");
    scanner.stop();
    orchestrator.stop();

    Ok(())
}

async fn start_health_server(health_checker: Arc<HealthChecker>, port: u16) {
    use warp::Filter;

    let health = warp::path("health")
        .and(warp::any().map(move || health_checker.clone()))
        .and_then(|checker: Arc<HealthChecker>| async move {
            let status = checker.get_status().await;
            Ok::<_, warp::Rejection>(warp::reply::json(&status))
        });

    warp::serve(health).run(([0, 0, 0, 0], port)).await;
}
