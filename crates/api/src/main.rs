use std::net::SocketAddr;
use std::sync::Arc;

use reefwatch_api::config::ServerConfig;
use reefwatch_api::jobs::JobRegistry;
use reefwatch_api::router::build_app_router;
use reefwatch_api::state::AppState;
use reefwatch_pipeline::overlay::Overlay;
use reefwatch_pipeline::processor::DetectionService;
use reefwatch_pipeline::registry::ModelRegistry;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "reefwatch_api=debug,reefwatch_pipeline=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Directories ---
    for dir in [&config.upload_dir, &config.results_dir] {
        std::fs::create_dir_all(dir)
            .unwrap_or_else(|e| panic!("Failed to create directory {}: {e}", dir.display()));
    }
    tracing::info!(
        uploads = %config.upload_dir.display(),
        results = %config.results_dir.display(),
        "Storage directories ready"
    );

    // --- ffmpeg ---
    let tools = config.ffmpeg_tools();
    let ffmpeg_version = tools
        .verify()
        .await
        .unwrap_or_else(|e| panic!("ffmpeg/ffprobe unavailable: {e}"));
    tracing::info!(version = %ffmpeg_version, "ffmpeg available");

    // --- Models ---
    let registry = ModelRegistry::load_dir(&config.models_dir, config.confidence_threshold)
        .unwrap_or_else(|e| panic!("Failed to load detection models: {e}"));
    tracing::info!(models = registry.len(), "Detection models loaded");

    // --- Overlay font ---
    let overlay = Overlay::with_font_file(&config.label_font_path)
        .unwrap_or_else(|e| panic!("Failed to load label font: {e}"));

    // --- App state ---
    let service = DetectionService::new(config.pipeline_config(), tools, registry, overlay);
    let state = AppState {
        config: Arc::new(config.clone()),
        service: Arc::new(service),
        jobs: Arc::new(JobRegistry::new()),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
