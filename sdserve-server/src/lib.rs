//! HTTP front end for Stable Diffusion.
//!
//! Two routes:
//! - `GET /health` reports the device, the active profile and whether the model is loaded.
//! - `POST /generate` turns a prompt into a base64 PNG data URI.

pub mod config;
pub mod encode;
pub mod error;
pub mod handlers;
pub mod state;

use std::sync::Arc;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

pub use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/generate", post(handlers::generate))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the listener fails.
pub async fn serve(listener: TcpListener, state: Arc<AppState>) -> Result<()> {
    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    tracing::info!("  GET  /health   - Health check");
    tracing::info!("  POST /generate - Text to image");
    axum::serve(listener, router(state).into_make_service()).await?;
    Ok(())
}
