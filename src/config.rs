//! Runtime configuration read from `.env` and the process environment.

use std::env;
use std::path::{Path, PathBuf};

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_FAST_MODEL: &str = "gemini-2.5-flash";
pub const DEFAULT_EXTENDED_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_THINKING_BUDGET: u32 = 32_768;
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_TTS_VOICE: &str = "Kore";
pub const DEFAULT_LOG_LEVEL: &str = "warn";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No API key configured. Set GEMINI_API_KEY (or API_KEY) in the environment or a .env file.")]
    MissingApiKey,

    #[error("{key} must be a non-negative integer, got '{value}'")]
    InvalidNumber { key: &'static str, value: String },
}

/// Settings for the Gemini-backed gateway.
#[derive(Clone, Debug, PartialEq)]
pub struct GatewayConfig {
    pub api_key: String,
    pub api_base: String,
    pub fast_model: String,
    pub extended_model: String,
    pub thinking_budget: u32,
    pub tts_model: String,
    pub tts_voice: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TutorConfig {
    pub gateway: GatewayConfig,
    pub data_dir: PathBuf,
    pub log_level: String,
}

impl TutorConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let api_key = non_empty("GEMINI_API_KEY")
            .or_else(|| non_empty("API_KEY"))
            .ok_or(ConfigError::MissingApiKey)?;

        let thinking_budget = match non_empty("TUTOR_THINKING_BUDGET") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::InvalidNumber {
                    key: "TUTOR_THINKING_BUDGET",
                    value: raw.clone(),
                })?,
            None => DEFAULT_THINKING_BUDGET,
        };

        let gateway = GatewayConfig {
            api_key,
            api_base: non_empty("TUTOR_API_BASE")
                .map(|base| base.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            fast_model: non_empty("TUTOR_FAST_MODEL")
                .unwrap_or_else(|| DEFAULT_FAST_MODEL.to_string()),
            extended_model: non_empty("TUTOR_EXTENDED_MODEL")
                .unwrap_or_else(|| DEFAULT_EXTENDED_MODEL.to_string()),
            thinking_budget,
            tts_model: non_empty("TUTOR_TTS_MODEL")
                .unwrap_or_else(|| DEFAULT_TTS_MODEL.to_string()),
            tts_voice: non_empty("TUTOR_TTS_VOICE")
                .unwrap_or_else(|| DEFAULT_TTS_VOICE.to_string()),
        };

        let data_dir = non_empty("TUTOR_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let log_level = non_empty("TUTOR_LOG").unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        Ok(Self {
            gateway,
            data_dir,
            log_level,
        })
    }
}

/// Loads `.env` from the working directory (or a parent) when one exists.
///
/// Returns the file that was loaded. Runs before logging is installed, so
/// the caller reports the outcome.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    skip_missing(dotenvy::dotenv().map(Some))
}

pub fn load_dotenv_from(path: &Path) -> Result<Option<PathBuf>, dotenvy::Error> {
    skip_missing(dotenvy::from_path(path).map(|()| Some(path.to_path_buf())))
}

fn skip_missing(
    result: Result<Option<PathBuf>, dotenvy::Error>,
) -> Result<Option<PathBuf>, dotenvy::Error> {
    match result {
        Err(err) if err.not_found() => Ok(None),
        other => other,
    }
}

fn default_data_dir() -> PathBuf {
    if let Some(data_dir) = dirs::data_local_dir() {
        return data_dir.join("socratic-tutor");
    }

    PathBuf::from("cache").join("socratic-tutor")
}
