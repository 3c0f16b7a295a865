use axum::{
    extract::{multipart::{MultipartError, MultipartRejection}, DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{SecondsFormat, Utc};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    models::{BannerResponse, DiagnosisRecord, HealthResponse, UploadedImage},
    pipeline::{Pipeline, PipelineError},
    validation::{ImagePolicy, ValidationError},
};

/// Multipart framing on top of the largest accepted file.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
    pub gemini_configured: bool,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.pipeline.policy().max_bytes as usize + MULTIPART_OVERHEAD;
    Router::new()
        .route("/", get(banner))
        .route("/api/health", get(health))
        .route("/api/analyze", post(analyze))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        )
        .with_state(state)
}

fn now_iso() -> String { Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true) }

pub async fn banner() -> Json<BannerResponse> {
    Json(BannerResponse {
        message: "Plant Disease Detection API is running!",
        status: "OK",
        timestamp: now_iso(),
    })
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK",
        timestamp: now_iso(),
        gemini_status: if state.gemini_configured { "Configured" } else { "Not Configured" },
    })
}

pub async fn analyze(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DiagnosisRecord>, PipelineError> {
    let upload = match multipart {
        Ok(multipart) => read_image_field(multipart, state.pipeline.policy()).await?,
        Err(rejection) => {
            tracing::warn!("🚫 Not a multipart upload: {}", rejection.body_text());
            None
        }
    };
    let record = state.pipeline.analyze(upload).await?;
    Ok(Json(record))
}

/// Pulls the first file in the `image` field. Declared type is checked before the
/// body is buffered so obviously wrong uploads are refused early.
async fn read_image_field(mut multipart: Multipart, policy: &ImagePolicy) -> Result<Option<UploadedImage>, ValidationError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_reason)? {
        if field.name() != Some("image") {
            continue;
        }
        let Some(filename) = field.file_name().map(str::to_string) else { continue };
        let media_type = field.content_type().unwrap_or("application/octet-stream").to_string();
        policy.check_declared(&media_type, &filename)?;

        let bytes = field.bytes().await.map_err(multipart_reason)?;
        tracing::info!("📥 Received '{}' ({} bytes, {})", filename, bytes.len(), media_type);
        return Ok(Some(UploadedImage::new(bytes, media_type, filename)));
    }
    Ok(None)
}

fn multipart_reason(err: MultipartError) -> ValidationError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ValidationError::TooLarge
    } else {
        tracing::warn!("🚫 Malformed multipart body: {}", err.body_text());
        ValidationError::Missing
    }
}
