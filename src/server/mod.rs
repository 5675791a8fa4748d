mod handlers;
mod state;

use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

use crate::config::ServiceConfig;

pub use state::{AppState, LastSeen};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/status", get(handlers::status))
        .route("/api/start", post(handlers::start))
        .route("/api/stop", post(handlers::stop))
        .route("/api/providers", get(handlers::providers))
        .route("/api/last", get(handlers::last))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve the control API until the process is interrupted. The tracking
/// session is destroyed on the way out.
pub async fn start(config: &ServiceConfig, host: &str, port: u16) -> std::io::Result<()> {
    let state = Arc::new(AppState::from_config(config));
    let app = build_router(state.clone());
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("location tracker control server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tokio::task::spawn_blocking(move || state.service.destroy())
        .await
        .map_err(std::io::Error::other)?;
    info!("control server stopped");
    Ok(())
}
