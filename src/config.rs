use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-1.5-flash";
pub const DEFAULT_PORT: u16 = 5000;

/// Settings read once at startup and handed to the components that need them.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: Option<String>,
    pub api_base: String,
    pub model: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub timeout: Duration,
    pub max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: DEFAULT_API_BASE.to_string(),
            model: DEFAULT_MODEL.to_string(),
            port: DEFAULT_PORT,
            upload_dir: PathBuf::from("uploads"),
            timeout: Duration::from_secs(60),
            max_attempts: 1,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unparsable values fall back to the defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let non_blank = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        Self {
            api_key: non_blank("GEMINI_API_KEY"),
            api_base: non_blank("GEMINI_API_BASE")
                .map(|v| v.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            model: non_blank("GEMINI_MODEL").unwrap_or(defaults.model),
            port: non_blank("PORT").and_then(|v| v.parse().ok()).unwrap_or(defaults.port),
            upload_dir: non_blank("UPLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.upload_dir),
            timeout: non_blank("GEMINI_TIMEOUT_SECS")
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_attempts: non_blank("GEMINI_MAX_ATTEMPTS")
                .and_then(|v| v.parse::<u32>().ok())
                .map(|n| n.max(1))
                .unwrap_or(defaults.max_attempts),
        }
    }

    pub fn gemini_configured(&self) -> bool { self.api_key.is_some() }

    /// First few characters of the key, for startup logs.
    pub fn masked_key(&self) -> String {
        match &self.api_key {
            Some(key) => format!("{}...", key.chars().take(6).collect::<String>()),
            None => "<none>".to_string(),
        }
    }
}
