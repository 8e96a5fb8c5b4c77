use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use taskpulse::{
    assistant::AssistantConfig, auth::JwtAuth, config::ServerConfig, state::AppState,
    tasks::InMemoryTaskStore,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env file if present (before any env var reads)
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "taskpulse=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting taskpulse...");

    let config = ServerConfig::from_env();
    let identity = Arc::new(JwtAuth::from_env()?);

    let assistant_config = AssistantConfig::from_env();
    let assistant = match assistant_config.build_assistant() {
        Ok(assistant) => {
            tracing::info!(provider = assistant.name(), "Assistant initialized");
            Some(assistant)
        }
        Err(e) => {
            tracing::warn!(
                "Failed to initialize assistant: {}. AI requests will be refused.",
                e
            );
            None
        }
    };

    let addr = config.bind_addr;
    let state = Arc::new(AppState::new(
        config,
        identity,
        assistant,
        Arc::new(InMemoryTaskStore::new()),
    ));
    let reaper = state.start_reaper();

    let app = taskpulse::app(state.clone());

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped, shutting down background tasks");
    state.shutdown();
    let _ = reaper.await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
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

    tracing::info!("Shutdown signal received");
}
