
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::embeddings::ollama::{
    DEFAULT_EMBEDDING_DIMENSION, DEFAULT_RETRY_DELAY, EXPONENTIAL_BACKOFF_BASE,
};

const HOME_ENV_VAR: &str = "STOREBOT_HOME";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub whatsapp: Option<WhatsAppConfig>,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub embedding_model: String,
    pub chat_model: String,
    pub embedding_dimension: u32,
    pub timeout_seconds: u64,
    pub retry_attempts: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            embedding_model: "nomic-embed-text:latest".to_string(),
            chat_model: "llama3.1:8b".to_string(),
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
            timeout_seconds: 30,
            retry_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
        }
    }
}

/// Ceilings applied to tenants on the free plan
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LimitsConfig {
    pub free_question_limit: i64,
    pub free_upload_limit: i64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            free_question_limit: 20,
            free_upload_limit: 5,
        }
    }
}

/// Knobs for context retrieval and prompt assembly
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetrievalConfig {
    pub top_k: usize,
    pub snippet_chars: usize,
    pub history_turns: usize,
    pub text_chunk_chars: usize,
    pub call_timeout_seconds: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 20,
            snippet_chars: 100,
            history_turns: 6,
            text_chunk_chars: 5000,
            call_timeout_seconds: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WhatsAppConfig {
    pub account_sid: String,
    pub auth_token: String,
    /// Sender number without the `whatsapp:` prefix
    pub from_number: String,
    /// Tenant whose keywords and documents answer WhatsApp traffic
    pub tenant_id: String,
    #[serde(default = "default_twilio_api_base")]
    pub api_base: String,
}

pub(crate) fn default_twilio_api_base() -> String {
    "https://api.twilio.com".to_string()
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid timeout: {0} (must be between 1 and 600 seconds)")]
    InvalidTimeout(u64),
    #[error("Invalid retry attempts: {0} (must be between 1 and 10)")]
    InvalidRetryAttempts(u32),
    #[error("Invalid plan limit: {0} (cannot be negative)")]
    InvalidLimit(i64),
    #[error("Invalid top_k: {0} (must be between 1 and 100)")]
    InvalidTopK(usize),
    #[error("Invalid snippet length: {0} (must be between 20 and 4000 characters)")]
    InvalidSnippetChars(usize),
    #[error("Invalid history window: {0} (must be at most 50 turns)")]
    InvalidHistoryTurns(usize),
    #[error("Invalid text chunk size: {0} (must be between 200 and 20000 characters)")]
    InvalidTextChunkChars(usize),
    #[error("Invalid WhatsApp setting: {0}")]
    InvalidWhatsApp(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Config {
    /// Base directory holding `config.toml`, `metadata.db` and `vectors/`
    #[inline]
    pub fn config_dir() -> Result<PathBuf, ConfigError> {
        if let Some(home) = std::env::var_os(HOME_ENV_VAR) {
            return Ok(PathBuf::from(home));
        }
        dirs::config_dir()
            .map(|dir| dir.join("storebot"))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    /// Load from the default base directory
    #[inline]
    pub fn load_default() -> Result<Self> {
        let dir = Self::config_dir().context("Failed to resolve configuration directory")?;
        Self::load(dir)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.ollama.validate()?;
        self.validate_server()?;
        self.validate_limits()?;
        self.validate_retrieval()?;
        if let Some(whatsapp) = &self.whatsapp {
            whatsapp.validate()?;
        }
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::InvalidUrl(self.server.host.clone()));
        }
        Ok(())
    }

    fn validate_limits(&self) -> Result<(), ConfigError> {
        let limits = &self.limits;
        if limits.free_question_limit < 0 {
            return Err(ConfigError::InvalidLimit(limits.free_question_limit));
        }
        if limits.free_upload_limit < 0 {
            return Err(ConfigError::InvalidLimit(limits.free_upload_limit));
        }
        Ok(())
    }

    fn validate_retrieval(&self) -> Result<(), ConfigError> {
        let config = &self.retrieval;

        if !(1..=100).contains(&config.top_k) {
            return Err(ConfigError::InvalidTopK(config.top_k));
        }

        if !(20..=4000).contains(&config.snippet_chars) {
            return Err(ConfigError::InvalidSnippetChars(config.snippet_chars));
        }

        if config.history_turns > 50 {
            return Err(ConfigError::InvalidHistoryTurns(config.history_turns));
        }

        if !(200..=20_000).contains(&config.text_chunk_chars) {
            return Err(ConfigError::InvalidTextChunkChars(config.text_chunk_chars));
        }

        if !(1..=600).contains(&config.call_timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(config.call_timeout_seconds));
        }

        Ok(())
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    /// Get the path for the SQLite database
    #[inline]
    pub fn database_path(&self) -> PathBuf {
        self.get_base_dir().join("metadata.db")
    }

    /// Get the path for the vector database directory
    #[inline]
    pub fn vector_database_path(&self) -> PathBuf {
        self.get_base_dir().join("vectors")
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }

    #[inline]
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.embedding_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.embedding_model.clone()));
        }

        if self.chat_model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.chat_model.clone()));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        if !(1..=600).contains(&self.timeout_seconds) {
            return Err(ConfigError::InvalidTimeout(self.timeout_seconds));
        }

        if !(1..=10).contains(&self.retry_attempts) {
            return Err(ConfigError::InvalidRetryAttempts(self.retry_attempts));
        }

        Ok(())
    }

    /// Worst case for one client call: every attempt hits the request timeout
    /// and every backoff sleep is taken
    #[inline]
    pub fn retry_budget(&self) -> Duration {
        let attempts = self.retry_attempts.max(1);
        let requests = Duration::from_secs(self.timeout_seconds) * attempts;
        let backoff = (1..attempts)
            .map(|attempt| DEFAULT_RETRY_DELAY * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1))
            .sum::<Duration>();
        requests + backoff
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_protocol(&mut self, protocol: String) -> Result<(), ConfigError> {
        if protocol != "http" && protocol != "https" {
            return Err(ConfigError::InvalidProtocol(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn set_host(&mut self, host: String) -> Result<(), ConfigError> {
        let temp_config = OllamaConfig {
            host: host.clone(),
            ..self.clone()
        };
        temp_config.validate()?;
        self.host = host;
        Ok(())
    }

    pub fn set_port(&mut self, port: u16) -> Result<(), ConfigError> {
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.port = port;
        Ok(())
    }

    pub fn set_embedding_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.embedding_model = model;
        Ok(())
    }

    pub fn set_chat_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.chat_model = model;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl WhatsAppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.account_sid.trim().is_empty() {
            return Err(ConfigError::InvalidWhatsApp(
                "account_sid cannot be empty".to_string(),
            ));
        }
        if self.auth_token.trim().is_empty() {
            return Err(ConfigError::InvalidWhatsApp(
                "auth_token cannot be empty".to_string(),
            ));
        }
        if self.from_number.trim().is_empty() {
            return Err(ConfigError::InvalidWhatsApp(
                "from_number cannot be empty".to_string(),
            ));
        }
        if self.tenant_id.trim().is_empty() {
            return Err(ConfigError::InvalidWhatsApp(
                "tenant_id cannot be empty".to_string(),
            ));
        }
        Url::parse(&self.api_base).map_err(|_| ConfigError::InvalidUrl(self.api_base.clone()))?;
        Ok(())
    }
}
