use bytes::Bytes;
use indexmap::IndexMap;
use serde::{Serialize, Serializer};

/// One file pulled out of the `image` multipart field. Lives for a single request.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub media_type: String,
    pub filename: String,
}

impl UploadedImage {
    pub fn new(bytes: impl Into<Bytes>, media_type: impl Into<String>, filename: impl Into<String>) -> Self {
        Self { bytes: bytes.into(), media_type: media_type.into(), filename: filename.into() }
    }

    pub fn size(&self) -> u64 { self.bytes.len() as u64 }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Severity {
    None,
    Mild,
    Moderate,
    Severe,
}

impl Severity {
    /// Reads the leading word of a free-text severity ("Moderate (5/10)" -> Moderate).
    pub fn parse_loose(raw: &str) -> Option<Self> {
        let word = raw
            .trim()
            .split(|c: char| !c.is_ascii_alphabetic())
            .find(|w| !w.is_empty())?;
        match word.to_ascii_lowercase().as_str() {
            "none" | "healthy" => Some(Self::None),
            "mild" | "low" => Some(Self::Mild),
            "moderate" | "medium" => Some(Self::Moderate),
            "severe" | "high" | "critical" => Some(Self::Severe),
            _ => None,
        }
    }
}

/// Detail rows in the order the model listed them.
pub type Details = IndexMap<String, String>;

/// Whole confidences go out as JSON integers (`95`), fractional ones as floats (`87.5`).
fn serialize_confidence<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if value.fract() == 0.0 && (0.0..=100.0).contains(value) {
        serializer.serialize_u64(*value as u64)
    } else {
        serializer.serialize_f64(*value)
    }
}

/// The structured diagnosis returned to the UI. Always fully populated.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisRecord {
    pub category: String,
    pub plant_type: String,
    #[serde(serialize_with = "serialize_confidence")]
    pub confidence: f64,
    pub severity: Severity,
    pub description: String,
    pub treatment: String,
    pub prevention: String,
    pub tags: Vec<String>,
    pub details: Details,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub gemini_status: &'static str,
}

#[derive(Debug, Serialize)]
pub struct BannerResponse {
    pub message: &'static str,
    pub status: &'static str,
    pub timestamp: String,
}
