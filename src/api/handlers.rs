use axum::{extract::State, response::IntoResponse, Json};
use serde::Serialize;
use tracing::info;

use crate::api::AppState;
use crate::models::{ExtractBillRequest, ExtractionResult};

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub message: &'static str,
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn root() -> impl IntoResponse {
    Json(RootResponse {
        message: "Bill Extraction API",
        status: "running",
    })
}

pub async fn health_check() -> impl IntoResponse {
    Json(HealthResponse { status: "healthy" })
}

/// Always answers 200; document problems are reported inside the result.
pub async fn extract_bill_data(
    State(state): State<AppState>,
    Json(request): Json<ExtractBillRequest>,
) -> Json<ExtractionResult> {
    info!(document = %request.document, "extraction requested");
    let result = state
        .pipeline
        .extract_document(state.source.as_ref(), &request.document)
        .await;
    info!(
        is_success = result.is_success,
        items = result.data.total_item_count(),
        total_tokens = result.token_usage.total_tokens(),
        "extraction answered"
    );
    Json(result)
}
