use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::services::{ServeDir, ServeFile};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use classhub::config::Config;
use classhub::rooms::HttpRoomProvider;
use classhub::storage::ObjectStore;
use classhub::AppState;

#[derive(Parser, Debug)]
#[command(name = "classhub")]
#[command(author, version, about = "A role-based learning portal backend", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "classhub.toml")]
    config: PathBuf,

    /// Override log level
    #[arg(short, long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(&cli.config)?;

    // Initialize logging
    let log_level = cli
        .log_level
        .as_ref()
        .unwrap_or(&config.logging.level)
        .clone();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting Classhub v{}", env!("CARGO_PKG_VERSION"));

    // Ensure data directory exists
    std::fs::create_dir_all(&config.server.data_dir)?;

    // Initialize database
    let db = classhub::db::init(&config.server.data_dir).await?;

    // Ensure seed admin user exists
    classhub::api::auth::ensure_admin_user(
        &db,
        &config.auth.admin_email,
        config.auth.admin_password.as_deref(),
    )
    .await?;

    // Video-room provider and object storage
    let rooms = Arc::new(HttpRoomProvider::new(
        config.rooms.api_base.clone(),
        config.rooms.api_key.clone(),
    ));
    if config.rooms.api_key.is_none() {
        tracing::warn!("No rooms.api_key configured; sessions will be created without rooms");
    }

    let storage = Arc::new(ObjectStore::from_config(&config.storage).await);
    if !storage.is_configured() {
        tracing::warn!("No storage.bucket configured; file uploads are disabled");
    }

    // Create app state
    let state = Arc::new(AppState::new(config.clone(), db.clone(), rooms, storage));

    // Create API router
    let api_router = classhub::api::create_router(state.clone());

    // Serve the frontend with SPA fallback
    let static_dir = config.server.static_dir.clone();
    let index_file = static_dir.join("index.html");
    let serve_static = ServeDir::new(&static_dir).not_found_service(ServeFile::new(&index_file));

    // API first, static pages as fallback, redirector in front of both
    // (API paths pass through it untouched)
    let app = axum::Router::new()
        .merge(api_router)
        .fallback_service(serve_static)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            classhub::api::redirect::redirect_middleware,
        ));

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
