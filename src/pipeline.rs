use std::sync::Arc;

use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
    gemini::{Diagnoser, InferenceError},
    models::{DiagnosisRecord, UploadedImage},
    normalize::normalize,
    store::{CleanupGuard, Handle, StoreError, TransientStore},
    validation::{ImagePolicy, ValidationError},
};

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
}

impl IntoResponse for PipelineError {
    fn into_response(self) -> Response {
        match self {
            PipelineError::Validation(reason) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": reason.to_string() }))).into_response()
            }
            PipelineError::Storage(e) => server_error(e.to_string()),
            PipelineError::Inference(e) => server_error(e.to_string()),
        }
    }
}

fn server_error(details: String) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Failed to analyze image", "details": details })),
    )
        .into_response()
}

/// Runs one upload through validate -> store -> diagnose -> normalize, always
/// deleting the stored file before returning.
pub struct Pipeline {
    policy: ImagePolicy,
    store: Arc<dyn TransientStore>,
    diagnoser: Arc<dyn Diagnoser>,
}

impl Pipeline {
    pub fn new(policy: ImagePolicy, store: Arc<dyn TransientStore>, diagnoser: Arc<dyn Diagnoser>) -> Self {
        Self { policy, store, diagnoser }
    }

    pub fn policy(&self) -> &ImagePolicy { &self.policy }

    pub async fn analyze(&self, upload: Option<UploadedImage>) -> Result<DiagnosisRecord, PipelineError> {
        let upload = self.validated(upload).map_err(|reason| {
            warn!(%reason, "🚫 Upload rejected");
            PipelineError::from(reason)
        })?;
        info!(filename = %upload.filename, media_type = %upload.media_type, size = upload.size(), "✅ Validated");

        let handle = self.store.reserve(&upload.filename);
        let mut guard = CleanupGuard::new(Arc::clone(&self.store), handle.clone());
        if let Err(e) = guard.write(upload.bytes.clone()).await {
            error!(%handle, error = %e, "❌ Failed to store upload");
            guard.release().await;
            return Err(e.into());
        }
        info!(%handle, "📦 Stored");

        let outcome = self.diagnose_stored(&handle, &upload.media_type).await;

        guard.release().await;
        info!(%handle, ok = outcome.is_ok(), "🧹 Cleaned");
        outcome
    }

    fn validated(&self, upload: Option<UploadedImage>) -> Result<UploadedImage, ValidationError> {
        self.policy.validate(upload.as_ref())?;
        upload.ok_or(ValidationError::Missing)
    }

    async fn diagnose_stored(&self, handle: &Handle, media_type: &str) -> Result<DiagnosisRecord, PipelineError> {
        let bytes = self.store.read(handle).await?;

        info!(%handle, "🔗 Requested");
        let raw = self.diagnoser.diagnose(&bytes, media_type).await.map_err(|e| {
            error!(%handle, error = %e, "❌ Inference failed");
            PipelineError::from(e)
        })?;

        let record = normalize(&raw);
        info!(%handle, category = %record.category, confidence = record.confidence, "🌿 Normalized");
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::fallback_record;
    use crate::store::{tests::file_count, DiskStore};
    use crate::validation::tests::{fake_image, JPEG_MAGIC};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::path::PathBuf;
    use std::time::Duration;
    use tempfile::TempDir;

    /// Canned model behaviour. Also records whether the stored file existed during the call.
    struct CannedDiagnoser {
        pub reply: Result<String, String>,
        pub scratch: Option<PathBuf>,
    }

    #[async_trait]
    impl Diagnoser for CannedDiagnoser {
        async fn diagnose(&self, _image: &[u8], _media_type: &str) -> Result<String, InferenceError> {
            if let Some(dir) = &self.scratch {
                assert_eq!(file_count(dir), 1, "upload should be on disk while the model runs");
            }
            self.reply.clone().map_err(InferenceError::Http)
        }
    }

    fn pipeline(tmp: &TempDir, reply: Result<&str, &str>) -> Pipeline {
        Pipeline::new(
            ImagePolicy::default(),
            Arc::new(DiskStore::new(tmp.path())),
            Arc::new(CannedDiagnoser {
                reply: reply.map(String::from).map_err(String::from),
                scratch: Some(tmp.path().to_path_buf()),
            }),
        )
    }

    fn jpeg() -> UploadedImage {
        UploadedImage::new(fake_image(JPEG_MAGIC, 2048), "image/jpeg", "leaf.jpg")
    }

    #[tokio::test]
    async fn success_returns_record_and_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let record = pipeline(&tmp, Ok(r#"noise {"category":"Healthy Plant","plantType":"Basil"} noise"#))
            .analyze(Some(jpeg()))
            .await
            .unwrap();
        assert_eq!(record.category, "Healthy Plant");
        assert_eq!(file_count(tmp.path()), 0);
    }

    #[tokio::test]
    async fn inference_failure_still_cleans_up() {
        let tmp = TempDir::new().unwrap();
        let err = pipeline(&tmp, Err("connection reset")).analyze(Some(jpeg())).await.unwrap_err();
        assert!(matches!(err, PipelineError::Inference(_)));
        assert_eq!(file_count(tmp.path()), 0);
    }

    #[tokio::test]
    async fn prose_reply_yields_fallback() {
        let tmp = TempDir::new().unwrap();
        let record = pipeline(&tmp, Ok("Looks like a happy plant.")).analyze(Some(jpeg())).await.unwrap();
        assert_eq!(record, fallback_record());
        assert_eq!(file_count(tmp.path()), 0);
    }

    #[tokio::test]
    async fn rejected_upload_never_touches_store() {
        let tmp = TempDir::new().unwrap();
        let p = pipeline(&tmp, Ok("{}"));

        let missing = p.analyze(None).await.unwrap_err();
        assert!(matches!(missing, PipelineError::Validation(ValidationError::Missing)));

        let svg = UploadedImage::new(b"<svg/>".to_vec(), "image/svg+xml", "leaf.svg");
        let unsupported = p.analyze(Some(svg)).await.unwrap_err();
        assert!(matches!(unsupported, PipelineError::Validation(ValidationError::UnsupportedType)));

        let big = UploadedImage::new(fake_image(JPEG_MAGIC, 15 * 1024 * 1024), "image/jpeg", "big.jpg");
        let too_large = p.analyze(Some(big)).await.unwrap_err();
        assert!(matches!(too_large, PipelineError::Validation(ValidationError::TooLarge)));

        assert_eq!(file_count(tmp.path()), 0);
    }

    /// Disk store whose writes take a while, so a request can be abandoned mid-write.
    struct SlowDisk(DiskStore);

    #[async_trait]
    impl TransientStore for SlowDisk {
        fn reserve(&self, original_filename: &str) -> Handle { self.0.reserve(original_filename) }

        async fn write(&self, handle: &Handle, bytes: &[u8]) -> Result<(), StoreError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.0.write(handle, bytes).await
        }

        async fn read(&self, handle: &Handle) -> Result<Vec<u8>, StoreError> { self.0.read(handle).await }

        async fn delete(&self, handle: &Handle) -> Result<(), StoreError> { self.0.delete(handle).await }
    }

    #[tokio::test]
    async fn request_abandoned_mid_write_leaves_no_file() {
        let tmp = TempDir::new().unwrap();
        let p = Pipeline::new(
            ImagePolicy::default(),
            Arc::new(SlowDisk(DiskStore::new(tmp.path()))),
            Arc::new(CannedDiagnoser { reply: Ok("{}".into()), scratch: None }),
        );

        let abandoned = tokio::time::timeout(Duration::from_millis(20), p.analyze(Some(jpeg()))).await;
        assert!(abandoned.is_err(), "analyze should still be writing");

        // the detached write lands at ~100ms; the guard deletes after it
        tokio::time::sleep(Duration::from_millis(300)).await;
        for _ in 0..50 {
            if file_count(tmp.path()) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(file_count(tmp.path()), 0);
    }

    #[tokio::test]
    async fn storage_failure_is_server_error() {
        let tmp = TempDir::new().unwrap();
        let p = Pipeline::new(
            ImagePolicy::default(),
            Arc::new(DiskStore::new(tmp.path().join("does-not-exist"))),
            Arc::new(CannedDiagnoser { reply: Ok("{}".into()), scratch: None }),
        );
        let err = p.analyze(Some(jpeg())).await.unwrap_err();
        assert!(matches!(err, PipelineError::Storage(_)));
        assert_eq!(err.into_response().status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn error_bodies_match_contract() {
        let bad = PipelineError::Validation(ValidationError::TooLarge).into_response();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        let body = axum::body::to_bytes(bad.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json, json!({ "error": "File too large. Maximum size is 10MB." }));

        let failed = PipelineError::Inference(InferenceError::Empty).into_response();
        assert_eq!(failed.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = axum::body::to_bytes(failed.into_body(), 1024).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Failed to analyze image");
        assert_eq!(json["details"], "no text content found in response");
    }
}
