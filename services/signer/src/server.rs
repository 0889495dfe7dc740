//! Signer Service HTTP Server

use std::{net::SocketAddr, sync::Arc};
use tracing::{error, info};

use axum::{
    Router,
    routing::{get, post},
};
use signer::{ModuleSupervisor, ModulesFile, TokenRegistry, default_backend_factory};
use tower_http::trace::TraceLayer;

use crate::{Config, ServiceError, handlers, handlers::AppState};

/// Create and configure the Axum router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health))
        // Tokens
        .route("/api/tokens", get(handlers::list_tokens))
        .route("/api/tokens/:token_id", get(handlers::get_token))
        .route(
            "/api/tokens/:token_id/activate",
            post(handlers::activate_token),
        )
        .route(
            "/api/tokens/:token_id/deactivate",
            post(handlers::deactivate_token),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the supervisor and serve the API until a shutdown signal arrives.
pub async fn run(config: Config, listener: tokio::net::TcpListener) -> Result<(), ServiceError> {
    let modules = ModulesFile::load(&config.modules_config)?.modules;
    info!(
        "Loaded {} modules from {}",
        modules.len(),
        config.modules_config.display()
    );

    let registry = TokenRegistry::new();
    let (supervisor, supervisor_handle) = ModuleSupervisor::new(
        modules,
        config.supervisor_config(),
        registry.clone(),
        default_backend_factory(),
    );
    let supervisor_task = supervisor.spawn();

    let state = Arc::new(AppState {
        registry,
        supervisor: supervisor_handle.clone(),
    });
    let app = create_router(state);

    info!(
        "Signer service listening on {}",
        listener
            .local_addr()
            .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 0)))
    );

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    info!("Stopping module supervisor");
    supervisor_handle.shutdown().await;
    if let Err(e) = supervisor_task.await {
        error!("Module supervisor task failed: {}", e);
    }

    served?;
    Ok(())
}

/// Wait for SIGTERM or SIGINT signal
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C signal"),
            Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
                info!("Received SIGTERM signal");
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

    info!("Starting graceful shutdown...");
}
