//! Application configuration.
//!
//! Read from `$CONTRACT_INTAKE_CONFIG`, or `<config dir>/contract-intake/config.toml`.
//! Every key is optional; a missing file means all defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::llm::gemini::GEMINI_DEFAULT_BASE_URL;
use crate::llm::{GeminiClient, LlmClient, LlmError, OllamaClient};
use crate::pipeline::ModelExtractor;
use crate::pipeline_config::{
    PipelineConfig, DEFAULT_BATCH_SIZE, DEFAULT_MAX_ROUNDS, DEFAULT_MODEL_TIMEOUT_SECS,
};

/// Application-level constants
pub const APP_NAME: &str = "contract-intake";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const CONFIG_PATH_ENV: &str = "CONTRACT_INTAKE_CONFIG";
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

pub const DEFAULT_MODEL_NAME: &str = "gemini-2.5-pro";
const OLLAMA_DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Log filter used when `RUST_LOG` is not set.
pub fn default_log_filter() -> &'static str {
    if cfg!(debug_assertions) {
        "contract_intake_lib=debug,contract_intake=debug,warn"
    } else {
        "contract_intake_lib=info,contract_intake=info,warn"
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot determine the user configuration directory")]
    NoConfigDir,

    #[error("Failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid configuration in {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Model client error: {0}")]
    Client(#[from] LlmError),
}

// ═══════════════════════════════════════════
// Sections
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Gemini,
    Ollama,
    /// Pattern extraction only.
    #[serde(rename = "none")]
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSection {
    pub provider: Provider,
    pub model_name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ModelSection {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model_name: DEFAULT_MODEL_NAME.to_string(),
            api_key: None,
            base_url: None,
            timeout_secs: DEFAULT_MODEL_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClarificationSection {
    pub max_rounds: usize,
    pub batch_size: usize,
}

impl Default for ClarificationSection {
    fn default() -> Self {
        Self {
            max_rounds: DEFAULT_MAX_ROUNDS,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorSection {
    pub model_retries: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub model: ModelSection,
    pub clarification: ClarificationSection,
    pub coordinator: CoordinatorSection,
}

// ═══════════════════════════════════════════
// Loading
// ═══════════════════════════════════════════

impl AppConfig {
    /// `$CONTRACT_INTAKE_CONFIG`, else the platform config directory.
    pub fn default_path() -> Result<PathBuf, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            if !path.trim().is_empty() {
                return Ok(PathBuf::from(path));
            }
        }
        dirs::config_dir()
            .map(|dir| dir.join(APP_NAME).join("config.toml"))
            .ok_or(ConfigError::NoConfigDir)
    }

    /// Load from `path` (or the default path). A missing file yields the
    /// defaults; an unreadable or malformed one is an error. The API key
    /// falls back to `$GEMINI_API_KEY` when the file does not set one.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            let parsed = Self::from_toml_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;
            tracing::debug!(path = %path.display(), "Configuration loaded");
            parsed
        } else {
            tracing::debug!(path = %path.display(), "No configuration file, using defaults");
            Self::default()
        };

        config.model.api_key = config.resolve_api_key(std::env::var(API_KEY_ENV).ok());
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// File value first, then the environment value; blanks count as unset.
    fn resolve_api_key(&self, env_value: Option<String>) -> Option<String> {
        let non_blank = |k: &String| !k.trim().is_empty();
        self.model
            .api_key
            .clone()
            .filter(non_blank)
            .or_else(|| env_value.filter(non_blank))
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            max_rounds: self.clarification.max_rounds,
            batch_size: self.clarification.batch_size,
            model_timeout_secs: self.model.timeout_secs,
            model_retries: self.coordinator.model_retries,
        }
        .normalized()
    }

    /// Build the configured client. `None` when no provider is selected or
    /// Gemini has no API key.
    pub fn build_client(&self) -> Result<Option<Box<dyn LlmClient>>, ConfigError> {
        let timeout = self.pipeline().model_timeout_secs;
        match self.model.provider {
            Provider::Disabled => Ok(None),
            Provider::Gemini => {
                let Some(key) = self.model.api_key.as_deref() else {
                    tracing::warn!("No Gemini API key configured, model extraction disabled");
                    return Ok(None);
                };
                let base_url = self.model.base_url.as_deref().unwrap_or(GEMINI_DEFAULT_BASE_URL);
                let client: Box<dyn LlmClient> = Box::new(GeminiClient::new(base_url, key, timeout)?);
                Ok(Some(client))
            }
            Provider::Ollama => {
                let base_url = self.model.base_url.as_deref().unwrap_or(OLLAMA_DEFAULT_BASE_URL);
                let client: Box<dyn LlmClient> = Box::new(OllamaClient::new(base_url, timeout)?);
                Ok(Some(client))
            }
        }
    }

    pub fn model_extractor(&self) -> Result<ModelExtractor, ConfigError> {
        Ok(match self.build_client()? {
            Some(client) => ModelExtractor::new(client, &self.model.model_name),
            None => ModelExtractor::unconfigured(),
        })
    }
}
