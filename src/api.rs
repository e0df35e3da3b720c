use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tracing::{error, info};

use crate::pipeline::Detector;
use crate::sniff::{CaptureLimits, PacketSource};

/// Default cap on a `/predict` request body; KDDTrain+ alone is about 19 MB.
pub const DEFAULT_UPLOAD_LIMIT: usize = 512 * 1024 * 1024;

pub struct AppState {
    pub detector: Arc<Detector>,
    pub source: Arc<dyn PacketSource>,
    pub limits: CaptureLimits,
    pub upload_limit: usize,
}

pub fn router(state: Arc<AppState>) -> Router {
    let upload_limit = state.upload_limit;
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/predict", get(predict_usage).post(predict))
        .route("/live", get(live))
        .layer(DefaultBodyLimit::max(upload_limit))
        .with_state(state)
}

fn now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

async fn index() -> Json<serde_json::Value> {
    Json(json!({ "message": "Detection service running. Use /predict or /live." }))
}

async fn health() -> Json<serde_json::Value> {
    // Artifacts are loaded before the router exists.
    Json(json!({
        "status": "ok",
        "model_loaded": true,
        "encoders_loaded": true,
        "label_encoder_loaded": true,
        "timestamp": now(),
    }))
}

async fn predict_usage() -> Json<serde_json::Value> {
    Json(json!({ "message": "Send a POST request with a CSV file to get predictions." }))
}

async fn predict(State(state): State<Arc<AppState>>, mut multipart: Multipart) -> Response {
    let upload = loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("file") => match field.bytes().await {
                Ok(bytes) => break bytes,
                Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
            },
            Ok(Some(_)) => continue,
            Ok(None) => {
                return error_response(StatusCode::BAD_REQUEST, "no file uploaded".to_string())
            }
            Err(e) => return error_response(StatusCode::BAD_REQUEST, e.to_string()),
        }
    };

    let detector = state.detector.clone();
    let outcome = tokio::task::spawn_blocking(move || detector.classify_csv(&upload[..])).await;
    match outcome {
        Ok(Ok(report)) => Json(report).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "batch classification failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
        Err(e) => error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn live(State(state): State<Arc<AppState>>) -> Response {
    let detector = state.detector.clone();
    let source = state.source.clone();
    let limits = state.limits;

    // Blocks for the whole capture window.
    let outcome =
        tokio::task::spawn_blocking(move || detector.classify_live(source.as_ref(), limits)).await;
    match outcome {
        Ok(Ok(report)) if report.total_packets == 0 => {
            info!("live capture produced no packets");
            Json(json!({ "error": "no packets captured" })).into_response()
        }
        Ok(Ok(report)) => Json(report).into_response(),
        Ok(Err(e)) => {
            error!(error = %e, "live capture failed");
            live_failure(e.to_string())
        }
        Err(e) => live_failure(e.to_string()),
    }
}

fn live_failure(details: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "live capture failed", "details": details })),
    )
        .into_response()
}

fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}
