// Main entry point - Dependency injection, server setup and tooling commands
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use anyhow::Context;
use axum::{routing::{get, post}, Router};
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::backend_gateway::BackendGateway;
use crate::application::connection_check::check_connection;
use crate::application::dashboard_service::DashboardService;
use crate::application::import_service::ImportService;
use crate::infrastructure::config::{load_dashboard_config, BackendSettings, DashboardConfig};
use crate::infrastructure::http_client::build_http_client;
use crate::infrastructure::rest_gateway::RestGateway;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    health_check, parking_spaces, parking_summary, playback_frame, refresh, stream_playback,
    toggle_playback, traffic_history, traffic_latest, traffic_summary, traffic_trends,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let mut config = load_dashboard_config()?;

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        None | Some("serve") => serve(config).await,
        Some("check-connection") => run_connection_check(&config.backend).await,
        Some("import") => {
            if let Some(root) = args.next() {
                config.import.root = root.into();
            }
            if let Some(date) = args.next() {
                config.import.target_date = Some(date);
            }
            run_import(config).await
        }
        Some(other) => anyhow::bail!(
            "unknown command '{}', expected serve, check-connection or import [root] [date]",
            other
        ),
    }
}

/// Create the backend client (infrastructure layer)
fn connect(backend: &BackendSettings) -> anyhow::Result<Arc<dyn BackendGateway>> {
    backend.validate()?;
    let client = build_http_client(backend.proxy.as_deref())?;
    Ok(Arc::new(RestGateway::new(
        backend.url.clone(),
        backend.anon_key.clone(),
        client,
        Duration::from_secs(backend.change_poll_secs),
    )))
}

async fn serve(config: DashboardConfig) -> anyhow::Result<()> {
    let gateway = connect(&config.backend)?;

    // Start coordinators and playback (application layer)
    let dashboard = Arc::new(DashboardService::activate(
        gateway,
        &config.refresh,
        &config.playback,
    )?);

    // Create application state
    let state = Arc::new(AppState {
        dashboard: dashboard.clone(),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/api/traffic/summary", get(traffic_summary))
        .route("/api/traffic/trends", get(traffic_trends))
        .route("/api/traffic/latest", get(traffic_latest))
        .route("/api/traffic/history", get(traffic_history))
        .route("/api/parking/summary", get(parking_summary))
        .route("/api/parking/spaces", get(parking_spaces))
        .route("/api/parking/playback", get(playback_frame))
        .route("/api/parking/playback/stream", get(stream_playback))
        .route("/api/parking/playback/toggle", post(toggle_playback))
        .route("/api/refresh", post(refresh))
        .layer(CompressionLayer::new().br(true).gzip(true))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!("Starting traffic-dashboard service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Release timers and subscriptions before exit
    dashboard.deactivate().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
}

async fn run_connection_check(backend: &BackendSettings) -> anyhow::Result<()> {
    println!("Backend URL: {}", if backend.url.is_empty() { "not set" } else { backend.url.as_str() });
    println!("API key: {}", if backend.anon_key.is_empty() { "not set".to_string() } else { format!("{} chars", backend.anon_key.len()) });
    println!("Proxy: {}", backend.proxy.as_deref().unwrap_or("none"));

    let gateway = connect(backend)?;
    let report = check_connection(gateway.as_ref()).await;

    match &report.counts_total {
        Ok(count) => println!("analytics_counts: {} rows", count),
        Err(e) => println!("analytics_counts: count failed ({})", e),
    }
    for probe in &report.probes {
        match &probe.outcome {
            Ok(()) => println!("  {}: ok", probe.table),
            Err(e) => println!("  {}: failed ({})", probe.table, e),
        }
    }

    if !report.is_healthy() {
        anyhow::bail!("{} table(s) unreachable", report.failed_tables().len());
    }
    Ok(())
}

async fn run_import(config: DashboardConfig) -> anyhow::Result<()> {
    let gateway = connect(&config.backend)?;
    let root = config.import.root.clone();
    let service = ImportService::new(gateway, config.import);

    let report = service
        .import_all()
        .await
        .with_context(|| format!("Import from {} aborted", root.display()))?;

    println!(
        "Imported {}/{} rows from {} files ({} failed batches)",
        report.rows_imported, report.rows_total, report.files, report.failed_batches
    );
    Ok(())
}
