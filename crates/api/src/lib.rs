//! `api` crate — HTTP surface of the workflow runtime.
//!
//! Routes:
//!   GET    /api/v1/workflows
//!   POST   /api/v1/workflows
//!   GET    /api/v1/workflows/{id}
//!   GET    /api/v1/workflows/{id}/executions
//!   POST   /api/v1/workflows/{id}/execute
//!   POST   /api/v1/webhook/{path}
//!   POST   /api/v1/jobs/{id}/resume
//!   GET    /api/v1/executions/{id}

pub mod error;
pub mod handlers;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use engine::WorkflowRuntime;

pub use error::ApiError;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub runtime: Arc<WorkflowRuntime>,
}

impl AppState {
    pub fn new(runtime: WorkflowRuntime) -> Self {
        Self {
            runtime: Arc::new(runtime),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/api/v1/workflows",
            get(handlers::workflows::list).post(handlers::workflows::create),
        )
        .route("/api/v1/workflows/:id", get(handlers::workflows::get))
        .route(
            "/api/v1/workflows/:id/executions",
            get(handlers::workflows::executions),
        )
        .route("/api/v1/workflows/:id/execute", post(handlers::workflows::execute))
        .route("/api/v1/webhook/:path", post(handlers::webhooks::handle_webhook))
        .route("/api/v1/jobs/:id/resume", post(handlers::jobs::resume))
        .route("/api/v1/executions/:id", get(handlers::executions::get))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: &str, state: AppState) -> std::io::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("API listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

#[cfg(test)]
mod tests;
