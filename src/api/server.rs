//! HTTP server setup and routing.

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tracing::info;

use crate::db::Pool;
use crate::extract::ExtractService;
use crate::summarize::Summarizer;
use crate::sync::Orchestrator;

/// Shared application context passed to all handlers.
///
/// AppContext implements Clone, which gives us `FromRef<AppContext>` for free
/// via Axum's blanket implementation.
#[derive(Clone)]
pub struct AppContext {
    pub pool: Pool,
    pub orchestrator: Arc<Orchestrator>,
    pub extract: ExtractService,
    pub summarizer: Arc<dyn Summarizer>,
    /// Retry ceiling used when classifying queue entries for diagnostics.
    pub max_retry_attempts: i32,
}

pub fn router(ctx: AppContext) -> Router {
    Router::new()
        .route("/sync", post(super::handlers::run_sync))
        .route("/sync/status/:id", get(super::handlers::sync_status))
        .route("/sync/last-sync", get(super::handlers::last_sync))
        .route("/sync/queue", get(super::handlers::queue_diagnostics))
        .route(
            "/articles/:id/fetch-content",
            post(super::handlers::fetch_content),
        )
        .route("/articles/:id/summarize", post(super::handlers::summarize))
        .route("/articles/:id/read", post(super::handlers::mark_read))
        .route("/articles/:id/unread", post(super::handlers::mark_unread))
        .route("/articles/:id/star", post(super::handlers::mark_starred))
        .route("/articles/:id/unstar", post(super::handlers::mark_unstarred))
        .with_state(ctx)
}

/// Run the HTTP API server until the process is stopped.
pub async fn run(ctx: AppContext, bind_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(%bind_addr, "HTTP API listening");
    axum::serve(listener, router(ctx)).await?;
    Ok(())
}
