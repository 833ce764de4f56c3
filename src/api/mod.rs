//! HTTP surface of the extractor.

mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::services::processor::Pipeline;
use crate::services::text_extraction::PageSource;

pub use handlers::*;

/// Shared by every request. Holds no per-request state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub source: Arc<dyn PageSource>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, source: Arc<dyn PageSource>) -> Self {
        AppState {
            pipeline: Arc::new(pipeline),
            source,
        }
    }
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .route("/extract-bill-data", post(extract_bill_data))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start_server(addr: &str, state: AppState) -> Result<(), std::io::Error> {
    tracing::info!("Starting API server on {}", addr);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app).await
}
