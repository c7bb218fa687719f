use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use distillery_core::{
    load_config, validate_config, BroadcastHub, CommandStages, JobService, JobStore,
    QueueManager, SqliteJobStore, StageSet,
};
use distillery_server::{create_router, AppState};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("DISTILLERY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    info!("Configuration loaded successfully");
    info!("Database path: {:?}", config.database.path);

    let missing = config.stages.missing();
    if !missing.is_empty() {
        let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
        warn!(
            "No command configured for stages: {} (jobs will fail there)",
            names.join(", ")
        );
    }

    // Create SQLite job store
    let store: Arc<dyn JobStore> = Arc::new(
        SqliteJobStore::new(&config.database.path).context("Failed to create job store")?,
    );
    info!("Job store initialized");

    let hub = Arc::new(BroadcastHub::new());

    // Stage collaborators run as external commands
    let stages = StageSet::from_shared(Arc::new(CommandStages::new(config.stages.clone())));

    // Create and start the worker pool
    let queue = Arc::new(QueueManager::new(
        config.queue.clone(),
        Arc::clone(&store),
        Arc::clone(&hub),
        stages,
    ));
    queue.start(config.queue.max_workers);
    info!("Queue manager started with {} workers", config.queue.max_workers);

    let service = Arc::new(JobService::new(store, hub, Arc::clone(&queue)));

    // Reconcile jobs left behind by a previous run
    let report = service
        .recover_on_startup(config.queue.requeue_pending_on_start)
        .context("Startup recovery failed")?;
    if report.requeued > 0 || report.failed > 0 {
        info!(
            "Recovered jobs: {} requeued, {} marked failed",
            report.requeued, report.failed
        );
    }

    // Create app state and router
    let addr = SocketAddr::new(config.server.host, config.server.port);
    let state = Arc::new(AppState::new(config, service));
    let app = create_router(state);

    // Start server
    info!("Starting server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    queue.stop().await;
    info!("Queue manager stopped");

    Ok(())
}

/// Initialize tracing. `DISTILLERY_LOG_FORMAT=json` switches to JSON lines.
fn init_logging() {
    let json = std::env::var("DISTILLERY_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
