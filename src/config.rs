//! Configuration: provider selection and the JSON config file.
//!
//! The config lives at `$XDG_CONFIG_HOME/codeloop/config.json`. A missing
//! file resolves to defaults; a malformed file is a fatal startup error;
//! unknown keys are ignored with a warning.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Supported local LLM server backends.
///
/// | Provider | Default URL | API |
/// |----------|-------------|-----|
/// | Ollama | http://localhost:11434 | native `/api/chat`, `/api/embed` |
/// | LMStudio | http://localhost:1234 | OpenAI `/v1/chat/completions`, `/v1/embeddings` |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Ollama,
    LMStudio,
}

impl Provider {
    /// Default base URL where this provider's server typically runs.
    pub fn default_url(&self) -> &'static str {
        match self {
            Provider::Ollama => "http://localhost:11434",
            Provider::LMStudio => "http://localhost:1234",
        }
    }
}

impl FromStr for Provider {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Provider::Ollama),
            "lmstudio" | "lm-studio" | "lm_studio" => Ok(Provider::LMStudio),
            _ => Err(Error::config(format!("Unknown provider: {}", s))),
        }
    }
}

/// Compression trigger thresholds. The token budget itself is `num_ctx`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    pub enabled: bool,
    pub min_messages_before_compress: usize,
    pub trigger_threshold_pct: f32,
    pub target_usage_pct: f32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_messages_before_compress: 10,
            trigger_threshold_pct: 0.75,
            target_usage_pct: 0.4,
        }
    }
}

/// Application configuration, deserialized from `config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Which backend client to instantiate.
    pub provider: Provider,

    /// Default model identifier.
    pub model: String,

    /// Embedding model identifier (only used when a semantic index is
    /// attached). Empty disables embeddings.
    pub embedding_model: String,

    pub ollama_host: String,
    pub lmstudio_host: String,

    /// Context window advertised to the provider.
    pub num_ctx: usize,

    /// Generation cap advertised to the provider.
    pub num_predict: i64,

    pub temperature: f32,

    /// Request the model's internal reasoning stream (Ollama only; ignored
    /// with a warning under lmstudio).
    pub enable_thinking: bool,

    /// UI-side toggle: echo raw tool-call JSON.
    pub show_tool_json: bool,

    /// Line count below which read_file bypasses the curator.
    pub file_read_small_threshold: usize,

    /// Argv vector for launching an external editor.
    pub editor: Vec<String>,

    pub compression: CompressionConfig,

    /// Unknown keys land here and are warned about, never fatal. They are
    /// written back on save so hand-added keys survive a round-trip.
    #[serde(flatten)]
    pub unknown: HashMap<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "qwen2.5-coder:14b".to_string(),
            embedding_model: String::new(),
            ollama_host: Provider::Ollama.default_url().to_string(),
            lmstudio_host: Provider::LMStudio.default_url().to_string(),
            num_ctx: 16384,
            num_predict: -1,
            temperature: 0.7,
            enable_thinking: false,
            show_tool_json: false,
            file_read_small_threshold: 100,
            editor: vec!["vi".to_string()],
            compression: CompressionConfig::default(),
            unknown: HashMap::new(),
        }
    }
}

impl Config {
    /// Directory holding `config.json` and `policies.json`.
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("codeloop")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.json")
    }

    pub fn policies_path() -> PathBuf {
        Self::config_dir().join("policies.json")
    }

    /// Loads the config from the default location.
    ///
    /// Missing file → defaults. Malformed file → `Error::Config` (fatal at
    /// startup, exit code 1). Unknown keys → warning, ignored.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no config file at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(e) => {
                return Err(Error::config(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let config: Config = serde_json::from_str(&raw).map_err(|e| {
            Error::config(format!("malformed config at {}: {}", path.display(), e))
        })?;

        for key in config.unknown.keys() {
            log::warn!("ignoring unknown config key '{}'", key);
        }

        config.validate()?;
        Ok(config)
    }

    /// Writes the config back out (the save contract of the external
    /// config-editor screen).
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::config(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)
            .map_err(|e| Error::config(format!("cannot write {}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Base URL for the active provider.
    pub fn active_host(&self) -> &str {
        match self.provider {
            Provider::Ollama => &self.ollama_host,
            Provider::LMStudio => &self.lmstudio_host,
        }
    }

    /// Startup validation: URLs, ranges, and provider/embedding-model
    /// format agreement.
    pub fn validate(&self) -> Result<()> {
        for (name, url) in [("ollama_host", &self.ollama_host), ("lmstudio_host", &self.lmstudio_host)] {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(Error::config(format!(
                    "{} must start with http:// or https://",
                    name
                )));
            }
        }

        if self.model.trim().is_empty() {
            return Err(Error::config("model cannot be empty"));
        }

        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(Error::config("temperature must be between 0.0 and 2.0"));
        }

        // Embedding model names are provider-specific. Ollama models look
        // like "nomic-embed-text" or "name:tag"; an OpenAI-style path or URL
        // here means the config points at the wrong provider.
        if !self.embedding_model.is_empty()
            && self.provider == Provider::Ollama
            && self.embedding_model.contains('/')
        {
            return Err(Error::config(format!(
                "embedding model '{}' does not look like an Ollama model name",
                self.embedding_model
            )));
        }

        Ok(())
    }
}
