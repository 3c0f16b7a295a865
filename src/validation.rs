use std::path::Path;

use image::ImageFormat;
use thiserror::Error;

use crate::models::UploadedImage;

pub const MAX_UPLOAD_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("No image file provided")]
    Missing,
    #[error("Only image files are allowed (JPEG, PNG, GIF, BMP, WEBP)")]
    UnsupportedType,
    #[error("File too large. Maximum size is 10MB.")]
    TooLarge,
}

/// Accept/reject policy for uploads. Pure: never touches storage.
#[derive(Debug, Clone)]
pub struct ImagePolicy {
    pub max_bytes: u64,
    media_types: &'static [&'static str],
    extensions: &'static [&'static str],
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
            media_types: &["image/jpeg", "image/jpg", "image/png", "image/gif", "image/bmp", "image/webp"],
            extensions: &["jpg", "jpeg", "png", "gif", "bmp", "webp"],
        }
    }
}

impl ImagePolicy {
    pub fn validate(&self, upload: Option<&UploadedImage>) -> Result<(), ValidationError> {
        let upload = upload.ok_or(ValidationError::Missing)?;
        self.check_declared(&upload.media_type, &upload.filename)?;
        self.check_size(upload.size())?;
        self.check_content(&upload.bytes)
    }

    /// Media type and filename extension, both available before the body is read.
    pub fn check_declared(&self, media_type: &str, filename: &str) -> Result<(), ValidationError> {
        let essence = media_type.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
        if !self.media_types.contains(&essence.as_str()) {
            return Err(ValidationError::UnsupportedType);
        }
        if let Some(ext) = Path::new(filename).extension() {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            if !self.extensions.contains(&ext.as_str()) {
                return Err(ValidationError::UnsupportedType);
            }
        }
        Ok(())
    }

    /// Inclusive ceiling: exactly `max_bytes` is accepted.
    pub fn check_size(&self, size: u64) -> Result<(), ValidationError> {
        if size > self.max_bytes {
            return Err(ValidationError::TooLarge);
        }
        Ok(())
    }

    pub fn check_content(&self, bytes: &[u8]) -> Result<(), ValidationError> {
        match image::guess_format(bytes) {
            Ok(ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::Gif | ImageFormat::Bmp | ImageFormat::WebP) => Ok(()),
            _ => Err(ValidationError::UnsupportedType),
        }
    }
}
