use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use invoicer_core::{
    load_config, select_sink, validate_config, DownloadPackager, EventBus, InvoiceService,
    LocalRepository, PlatformSink, ReimbursementSetAggregate, ReimbursementSetService,
    SinkCapabilities, UploadOrchestrator,
};
use invoicer_server::api::{create_router, WsBroadcaster};
use invoicer_server::state::AppState;

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("invoicer {} starting", VERSION);

    // Determine config path
    let config_path = std::env::var("INVOICER_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));
    info!("Configuration loaded successfully (hash {})", &config_hash[..16]);
    info!("Storage root: {:?}", config.storage.root);

    // Local backend serves both repositories
    let repository = Arc::new(
        LocalRepository::new(&config.storage.root).context("Failed to open local repository")?,
    );

    let bus = EventBus::new(config.events.capacity);

    let uploads = Arc::new(
        UploadOrchestrator::new(repository.clone(), bus.clone(), config.upload.clone())
            .context("Failed to create upload orchestrator")?,
    );

    let sink = select_sink(SinkCapabilities::detect(), &config.sink);
    info!("Using export sink: {}", sink.name());
    let exports = Arc::new(
        DownloadPackager::new(repository.clone(), sink, config.export.clone())
            .context("Failed to create download packager")?,
    );

    let invoices = InvoiceService::new(repository.clone(), bus.clone());
    let sets = ReimbursementSetService::new(repository.clone(), bus.clone());

    let set_aggregate = Arc::new(ReimbursementSetAggregate::new(repository));
    let _aggregate_subscription = ReimbursementSetAggregate::attach(&set_aggregate, &bus);
    if let Err(e) = set_aggregate.reload().await {
        warn!("Initial reimbursement set load failed: {}", e);
    }

    // Forward progress and events to WebSocket clients
    let ws_broadcaster = WsBroadcaster::default();
    let _progress_forwarder = ws_broadcaster.forward_upload_state(uploads.subscribe());
    let _event_forwarder = ws_broadcaster.forward_events(bus.receiver());
    info!("WebSocket broadcaster initialized");

    // Create app state
    let state = Arc::new(AppState::new(
        config.clone(),
        uploads.clone(),
        exports,
        invoices,
        sets,
        set_aggregate,
        bus,
        ws_broadcaster,
    ));

    // Create router
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // Stop a running batch so workers see the token before the runtime exits
    if uploads.cancel().await {
        info!("Cancelled running upload batch");
    }
    info!("Server shutting down...");

    Ok(())
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

    info!("Shutdown signal received");
}
