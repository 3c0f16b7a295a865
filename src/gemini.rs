use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::Config;

#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Gemini API key is not configured")]
    NotConfigured,
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("request timed out after {0} attempt(s)")]
    Timeout(u32),
    #[error("Gemini returned status={status} body={body}")]
    Status { status: StatusCode, body: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("no text content found in response")]
    Empty,
}

impl InferenceError {
    fn retryable(&self) -> bool {
        match self {
            Self::Http(_) | Self::Timeout(_) => true,
            Self::Status { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

/// Instruction sent next to every image. Mirrors the fields of `DiagnosisRecord`.
pub const DIAGNOSIS_PROMPT: &str = r#"Analyze this plant image for diseases and provide a detailed diagnosis.

Please respond in the following JSON format:
{
  "category": "Disease name or 'Healthy Plant'",
  "plantType": "Type of plant identified",
  "confidence": "Confidence percentage (number only)",
  "severity": "None/Mild/Moderate/Severe",
  "description": "Detailed description of findings",
  "treatment": "Specific treatment recommendations",
  "prevention": "Prevention tips for future",
  "tags": ["tag1", "tag2", "tag3"],
  "details": {
    "Disease Type": "Specific disease type",
    "Affected Area": "Which parts and percentage affected",
    "Severity Level": "Severity with scale (e.g., 'Moderate (5/10)')",
    "Treatment Urgency": "How quickly treatment is needed",
    "Recovery Time": "Expected recovery time with treatment",
    "Contagious": "Yes/No and isolation recommendation"
  }
}

Focus on:
- Accurate disease identification
- Specific treatment recommendations
- Practical prevention advice
- Clear severity assessment
- Contagion risk and isolation needs

If the plant appears healthy, indicate that clearly.
If you're unsure, indicate lower confidence and suggest consulting an expert."#;

/// One multimodal call: the image inline as base64 plus the fixed instruction.
#[derive(Debug, Clone)]
pub struct DiagnosisRequest {
    pub image_base64: String,
    pub media_type: String,
    pub instruction: &'static str,
}

impl DiagnosisRequest {
    pub fn new(image: &[u8], media_type: &str) -> Self {
        Self {
            image_base64: base64::engine::general_purpose::STANDARD.encode(image),
            media_type: media_type.to_string(),
            instruction: DIAGNOSIS_PROMPT,
        }
    }

    pub fn to_body(&self) -> serde_json::Value {
        json!({
            "contents": [{
                "parts": [
                    {"text": self.instruction},
                    {"inlineData": {"mimeType": self.media_type, "data": self.image_base64}}
                ]
            }],
            "generationConfig": {
                "temperature": 0.4,
                "topP": 0.95,
                "topK": 40,
                "candidateCount": 1
            }
        })
    }
}

/// Anything that can turn an image into the model's raw answer text.
#[async_trait]
pub trait Diagnoser: Send + Sync {
    async fn diagnose(&self, image: &[u8], media_type: &str) -> Result<String, InferenceError>;
}

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        if s.len() > 100 {
                            *val = serde_json::Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

fn preview(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        text.to_string()
    } else {
        format!("{}...[{} chars]", text.chars().take(max).collect::<String>(), total)
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
    max_attempts: u32,
}

impl GeminiClient {
    pub fn new(config: &Config) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| InferenceError::Http(e.to_string()))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.api_base.clone(),
            model: config.model.clone(),
            max_attempts: config.max_attempts.max(1),
        })
    }

    async fn perform_api_call(&self, api_key: &str, body: &serde_json::Value) -> Result<String, InferenceError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);

        let response = self.client
            .post(&url)
            .header("x-goog-api-key", api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { InferenceError::Timeout(1) } else { InferenceError::Http(e.to_string()) })?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        let response_text = response.text().await.map_err(|e| {
            if e.is_timeout() { InferenceError::Timeout(1) } else { InferenceError::Http(e.to_string()) }
        })?;

        if !status.is_success() {
            error!("❌ API Error response: {}", preview(&response_text, 500));
            return Err(InferenceError::Status { status, body: response_text });
        }

        extract_text(&response_text)
    }
}

#[async_trait]
impl Diagnoser for GeminiClient {
    async fn diagnose(&self, image: &[u8], media_type: &str) -> Result<String, InferenceError> {
        let api_key = self.api_key.as_deref().ok_or(InferenceError::NotConfigured)?;
        let body = DiagnosisRequest::new(image, media_type).to_body();

        let mut logged = body.clone();
        truncate_base64_in_json(&mut logged);
        info!("📤 Request body: {}", logged);

        let mut attempt = 1;
        loop {
            info!(attempt, model = %self.model, "🔗 Calling Gemini");
            match self.perform_api_call(api_key, &body).await {
                Ok(text) => {
                    info!("📥 Raw Gemini text: {}", preview(&text, 300));
                    return Ok(text);
                }
                Err(e) if e.retryable() && attempt < self.max_attempts => {
                    warn!(attempt, error = %e, "🔄 Gemini call failed, retrying");
                    attempt += 1;
                }
                Err(InferenceError::Timeout(_)) => return Err(InferenceError::Timeout(attempt)),
                Err(e) => return Err(e),
            }
        }
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { #[serde(default)] content: Content }

#[derive(Debug, Deserialize, Default)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Other(serde::de::IgnoredAny),
}

/// Concatenates the text parts of the first candidate that has any.
fn extract_text(response_text: &str) -> Result<String, InferenceError> {
    let parsed: GeminiResponse = serde_json::from_str(response_text)
        .map_err(|e| InferenceError::Parse(e.to_string()))?;

    for candidate in &parsed.candidates {
        let text: String = candidate
            .content
            .parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text } => Some(text.as_str()),
                Part::Other(_) => None,
            })
            .collect();
        if !text.trim().is_empty() {
            return Ok(text);
        }
    }
    Err(InferenceError::Empty)
}
