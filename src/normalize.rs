//! Turns whatever text the model sent back into a complete `DiagnosisRecord`.
//!
//! The model is asked for JSON but frequently wraps it in prose or markdown
//! fences, returns numbers as strings, or drops fields. Nothing here fails:
//! unusable output becomes [`fallback_record`].

use serde_json::{Map, Value};
use tracing::warn;

use crate::models::{Details, DiagnosisRecord, Severity};

pub const FALLBACK_CONFIDENCE: f64 = 50.0;
const DEFAULT_SEVERITY: Severity = Severity::Mild;

pub fn normalize(raw_text: &str) -> DiagnosisRecord {
    let Some(span) = outer_brace_span(raw_text) else {
        warn!("⚠️ No JSON object found in model output, using fallback record");
        return fallback_record();
    };
    match serde_json::from_str::<Value>(span) {
        Ok(Value::Object(map)) => coerce(&map),
        Ok(other) => {
            warn!(kind = json_kind(&other), "⚠️ Model output is not a JSON object, using fallback record");
            fallback_record()
        }
        Err(e) => {
            warn!(error = %e, "⚠️ JSON parse error in model output, using fallback record");
            fallback_record()
        }
    }
}

/// From the first `{` to the last `}`, inclusive.
fn outer_brace_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

fn coerce(map: &Map<String, Value>) -> DiagnosisRecord {
    DiagnosisRecord {
        category: text_field(map, "category").unwrap_or_else(|| "Unknown".into()),
        plant_type: text_field(map, "plantType").unwrap_or_else(|| "Unknown".into()),
        confidence: map.get("confidence").and_then(confidence).unwrap_or(FALLBACK_CONFIDENCE),
        severity: map
            .get("severity")
            .and_then(Value::as_str)
            .and_then(Severity::parse_loose)
            .unwrap_or(DEFAULT_SEVERITY),
        description: text_field(map, "description").unwrap_or_else(|| "No description provided.".into()),
        treatment: text_field(map, "treatment")
            .unwrap_or_else(|| "No treatment provided. Consult a plant expert if symptoms persist.".into()),
        prevention: text_field(map, "prevention").unwrap_or_else(|| "No prevention advice provided.".into()),
        tags: match map.get("tags") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect(),
            _ => Vec::new(),
        },
        details: match map.get("details") {
            Some(Value::Object(entries)) => entries
                .iter()
                .filter_map(|(k, v)| scalar_text(v).map(|v| (k.clone(), v)))
                .collect(),
            _ => Details::new(),
        },
    }
}

fn text_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    map.get(key).and_then(scalar_text).filter(|s| !s.is_empty())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Accepts `87`, `87.5`, `"87"` and `"87%"`; clamps to 0-100 without rounding.
fn confidence(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then(|| n.clamp(0.0, 100.0))
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Fixed, fully-shaped record for output that could not be parsed.
pub fn fallback_record() -> DiagnosisRecord {
    DiagnosisRecord {
        category: "Analysis Error".into(),
        plant_type: "Unknown".into(),
        confidence: FALLBACK_CONFIDENCE,
        severity: DEFAULT_SEVERITY,
        description: "Unable to analyze image properly. Please try again with a clearer image.".into(),
        treatment: "Consult a plant expert for proper diagnosis.".into(),
        prevention: "Maintain good plant care practices.".into(),
        tags: vec!["Analysis Error".into(), "Retry Needed".into()],
        details: [
            ("Disease Type", "Unable to determine"),
            ("Affected Area", "Unknown"),
            ("Severity Level", "Unknown"),
            ("Treatment Urgency", "Consult expert"),
            ("Recovery Time", "Unknown"),
            ("Contagious", "Unknown"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect(),
    }
}
