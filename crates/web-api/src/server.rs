//! Axum server hosting the control websocket.

use crate::websocket::websocket_handler;
use anyhow::Result;
use axum::{routing::get, Router};
use funding_arb_orchestrator::{ControlHandle, EngineEvents};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state for the control endpoint.
#[derive(Clone)]
pub struct AppState {
    pub control: ControlHandle,
    pub events: Arc<EngineEvents>,
}

/// Builds the router; split out for tests.
#[must_use]
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(|| async { "ok" }))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the control API until the process exits.
///
/// # Errors
/// Returns an error when the listener cannot bind.
pub async fn run_server(addr: &str, control: ControlHandle, events: Arc<EngineEvents>) -> Result<()> {
    let state = AppState { control, events };
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr, "control api listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}
