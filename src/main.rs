//! Leadbot - conversational lead capture
//!
//! Drives a visitor through a scripted step graph, stores the finished lead
//! and streams funnel analytics to a sink.

mod analytics;
mod api;
mod config;
mod db;
mod flow;
mod runtime;
mod state_machine;
mod supabase;

use api::{create_router, AppState};
use config::AppConfig;
use db::Database;
use runtime::{AnalyticsSink, DatabaseSink, LeadPersister, RuntimeManager};
use state_machine::EngineContext;
use std::net::SocketAddr;
use std::sync::Arc;
use supabase::SupabaseClient;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "leadbot=info,tower_http=debug".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_current_span(false)
                .with_span_list(false),
        )
        .init();

    let config = AppConfig::from_env()?;

    // An invalid flow is fatal
    let graph = config.load_flow()?;
    tracing::info!(
        flow = ?config.flow,
        steps = graph.len(),
        start = %graph.start_id(),
        "Flow loaded"
    );

    let (persister, analytics, store): (Arc<dyn LeadPersister>, Arc<dyn AnalyticsSink>, _) =
        if let Some(supabase) = &config.supabase {
            tracing::info!(url = %supabase.url, "Using Supabase storage");
            let client = Arc::new(SupabaseClient::new(supabase.clone())?);
            let persister: Arc<dyn LeadPersister> = client.clone();
            let analytics: Arc<dyn AnalyticsSink> = client;
            (persister, analytics, None)
        } else {
            if let Some(parent) = config.db_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            tracing::info!(path = %config.db_path.display(), "Opening database");
            let db = Database::open(&config.db_path)?;
            let sink = Arc::new(DatabaseSink::new(db.clone()));
            let persister: Arc<dyn LeadPersister> = sink.clone();
            let analytics: Arc<dyn AnalyticsSink> = sink;
            (persister, analytics, Some(db))
        };

    let context = EngineContext::new(Arc::new(graph), config.engine_config());
    let runtime = Arc::new(RuntimeManager::new(
        context,
        config.runtime_settings(),
        config.source.clone(),
        persister,
        analytics,
    ));

    // Create router
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(AppState::new(runtime.clone(), store))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Leadbot server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Live sessions are abandoned so their analytics still go out
    runtime.shutdown_all().await;
    tracing::info!("Server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
