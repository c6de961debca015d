//! HTTP surface: `/predict` and `/health`

use crate::metrics::ServiceMetrics;
use crate::models::inference::{InferenceEngine, PredictError};
use crate::types::prediction::Prediction;
use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

/// Multipart field carrying the upload
pub const IMAGE_FIELD: &str = "image";

/// Shared, read-only request state
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<InferenceEngine>,
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    pub fn new(engine: Arc<InferenceEngine>, metrics: Arc<ServiceMetrics>) -> Self {
        Self { engine, metrics }
    }
}

/// Errors surfaced to HTTP callers as `{"error": ...}`
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No image provided")]
    NoImage,

    #[error("Invalid image file")]
    InvalidImage,

    /// Malformed or oversized upload, reported with the status axum chose
    #[error("{message}")]
    Rejected { status: StatusCode, message: String },

    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoImage | ApiError::InvalidImage => StatusCode::BAD_REQUEST,
            ApiError::Rejected { status, .. } => *status,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PredictError> for ApiError {
    fn from(err: PredictError) -> Self {
        match err {
            PredictError::InvalidImage(e) => {
                debug!(error = %e, "Image decode failed");
                ApiError::InvalidImage
            }
            PredictError::Inference(e) => {
                error!(error = ?e, "Prediction failed");
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        let status = err.status();
        if status.is_client_error() {
            ApiError::Rejected {
                status,
                message: err.body_text(),
            }
        } else {
            error!(error = %err, "Failed to read upload");
            ApiError::Internal(err.body_text())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Build the application router
pub fn router(state: AppState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/predict", post(predict))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn predict(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<Prediction>, ApiError> {
    let start_time = Instant::now();

    let result = run_prediction(&state, multipart).await;
    match &result {
        Ok(prediction) => {
            let processing_time = start_time.elapsed();
            state.metrics.record_prediction(
                processing_time,
                prediction.confidence,
                prediction.not_in_database,
            );
            info!(
                prediction = ?prediction.prediction,
                confidence = prediction.confidence,
                not_in_database = prediction.not_in_database,
                processing_time_us = processing_time.as_micros(),
                "Image classified"
            );
        }
        Err(e) if e.status().is_client_error() => {
            state.metrics.record_client_error();
            warn!(error = %e, "Rejected prediction request");
        }
        Err(_) => state.metrics.record_server_error(),
    }

    result.map(Json)
}

async fn run_prediction(
    state: &AppState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Prediction, ApiError> {
    // A body that is not multipart carries no files at all
    let mut multipart = multipart.map_err(|_| ApiError::NoImage)?;

    let mut image = None;
    while let Some(field) = multipart.next_field().await? {
        // Only a file part counts; a plain form value named `image` does not
        if field.name() == Some(IMAGE_FIELD) && field.file_name().is_some() {
            image = Some(field.bytes().await?);
            break;
        }
    }
    let image = image.ok_or(ApiError::NoImage)?;

    let engine = state.engine.clone();
    let prediction = tokio::task::spawn_blocking(move || engine.predict(&image))
        .await
        .map_err(|e| {
            error!(error = %e, "Inference task failed");
            ApiError::Internal(e.to_string())
        })??;

    Ok(prediction)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "model_loaded": true }))
}
