
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::BotError;
use crate::config::OllamaConfig;
use crate::pipeline::{ChatMessage, Completer, Embedder};

pub const DEFAULT_EMBEDDING_DIMENSION: u32 = 768;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);
pub const EXPONENTIAL_BACKOFF_BASE: u32 = 2;

/// Blocking Ollama client for embeddings and chat completions
#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: Url,
    embedding_model: String,
    chat_model: String,
    embedding_dimension: usize,
    agent: ureq::Agent,
    retry_attempts: u32,
    retry_delay: Duration,
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embedding: Vec<f32>,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    pub size: Option<u64>,
    pub digest: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    version: String,
}

impl OllamaClient {
    #[inline]
    pub fn new(config: &OllamaConfig) -> Result<Self> {
        let base_url = config
            .ollama_url()
            .context("Failed to generate Ollama URL from config")?;

        Ok(Self {
            base_url,
            embedding_model: config.embedding_model.clone(),
            chat_model: config.chat_model.clone(),
            embedding_dimension: config.embedding_dimension as usize,
            agent: build_agent(Duration::from_secs(config.timeout_seconds)),
            retry_attempts: config.retry_attempts.max(1),
            retry_delay: DEFAULT_RETRY_DELAY,
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.agent = build_agent(timeout);
        self
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    /// Base delay before the first retry; doubles on each further attempt
    #[inline]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    #[inline]
    pub fn embedding_dimension(&self) -> usize {
        self.embedding_dimension
    }

    /// Server reachable and both configured models pulled
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        debug!("Performing health check for Ollama at {}", self.base_url);

        let models = self.list_models().context("Failed to list models")?;
        for wanted in [&self.embedding_model, &self.chat_model] {
            if !models.iter().any(|m| &m.name == wanted) {
                let available: Vec<&str> = models.iter().map(|m| m.name.as_str()).collect();
                warn!("Model {} not found. Available models: {:?}", wanted, available);
                return Err(anyhow::anyhow!(
                    "Model '{}' is not available. Available models: {:?}",
                    wanted,
                    available
                ));
            }
        }

        info!(
            "Health check passed for Ollama at {} (embedding: {}, chat: {})",
            self.base_url, self.embedding_model, self.chat_model
        );
        Ok(())
    }

    /// Server version string
    #[inline]
    pub fn ping(&self) -> Result<String> {
        let url = self.endpoint("/api/version")?;
        let body = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to ping Ollama server")?;
        let version: VersionResponse =
            serde_json::from_str(&body).context("Failed to parse version response")?;
        Ok(version.version)
    }

    #[inline]
    pub fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let url = self.endpoint("/api/tags")?;
        debug!("Fetching available models from {}", url);

        let body = self
            .make_request_with_retry(|| {
                self.agent
                    .get(url.as_str())
                    .call()
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to fetch models")?;

        let models: ModelsResponse =
            serde_json::from_str(&body).context("Failed to parse models response")?;
        debug!("Found {} models", models.models.len());
        Ok(models.models)
    }

    #[inline]
    pub fn generate_embedding(&self, text: &str) -> Result<Vec<f32>> {
        debug!("Generating embedding for text (length: {})", text.len());

        let url = self.endpoint("/api/embeddings")?;
        let request = serde_json::to_string(&EmbedRequest {
            model: &self.embedding_model,
            prompt: text,
        })
        .context("Failed to serialize embedding request")?;

        let body = self
            .post_json(&url, &request)
            .context("Failed to generate embedding")?;
        let response: EmbedResponse =
            serde_json::from_str(&body).context("Failed to parse embedding response")?;

        if response.embedding.len() != self.embedding_dimension {
            return Err(anyhow::anyhow!(
                "Model {} returned {} dimensions, expected {}",
                self.embedding_model,
                response.embedding.len(),
                self.embedding_dimension
            ));
        }
        Ok(response.embedding)
    }

    /// Non-streaming chat completion
    #[inline]
    pub fn chat(&self, system: &str, history: &[ChatMessage], user: &str) -> Result<String> {
        let url = self.endpoint("/api/chat")?;
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend_from_slice(history);
        messages.push(ChatMessage::user(user));

        debug!(
            "Requesting chat completion from {} with {} messages",
            self.chat_model,
            messages.len()
        );
        let request = serde_json::to_string(&ChatRequest {
            model: &self.chat_model,
            messages,
            stream: false,
        })
        .context("Failed to serialize chat request")?;

        let body = self
            .post_json(&url, &request)
            .context("Failed to get chat completion")?;
        let response: ChatResponse =
            serde_json::from_str(&body).context("Failed to parse chat response")?;
        Ok(response.message.content)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .with_context(|| format!("Failed to build URL for {path}"))
    }

    fn post_json(&self, url: &Url, body: &str) -> Result<String> {
        self.make_request_with_retry(|| {
            self.agent
                .post(url.as_str())
                .header("Content-Type", "application/json")
                .send(body)
                .and_then(|mut resp| resp.body_mut().read_to_string())
        })
    }

    fn make_request_with_retry<F>(&self, mut request_fn: F) -> Result<String>
    where
        F: FnMut() -> Result<String, ureq::Error>,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("HTTP request attempt {}/{}", attempt, self.retry_attempts);

            let error = match request_fn() {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };

            match &error {
                ureq::Error::StatusCode(status) if *status >= 500 => {
                    warn!(
                        "Server error (status {}), attempt {}/{}",
                        status, attempt, self.retry_attempts
                    );
                }
                ureq::Error::StatusCode(status) => {
                    warn!("Client error (status {}), not retrying", status);
                    return Err(anyhow::anyhow!("Client error: HTTP {}", status));
                }
                ureq::Error::ConnectionFailed
                | ureq::Error::HostNotFound
                | ureq::Error::Timeout(_)
                | ureq::Error::Io(_) => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                }
                _ => return Err(anyhow::anyhow!("Non-retryable error: {}", error)),
            }

            last_error = Some(anyhow::anyhow!("Request error: {}", error));

            if attempt < self.retry_attempts {
                let delay = self.retry_delay * EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1);
                debug!("Waiting {:?} before retry", delay);
                std::thread::sleep(delay);
            }
        }

        error!("All retry attempts failed for request to {}", self.base_url);
        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

fn build_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::config_builder()
        .timeout_global(Some(timeout))
        .build()
        .into()
}

#[async_trait]
impl Embedder for OllamaClient {
    async fn embed(&self, text: &str) -> crate::Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.embedding_dimension]);
        }
        let client = self.clone();
        let text = text.to_string();
        tokio::task::spawn_blocking(move || client.generate_embedding(&text))
            .await
            .map_err(|e| BotError::Other(e.into()))?
            .map_err(|e| BotError::Embedding(format!("{e:#}")))
    }
}

#[async_trait]
impl Completer for OllamaClient {
    async fn complete(
        &self,
        system: &str,
        history: &[ChatMessage],
        user: &str,
    ) -> crate::Result<String> {
        let client = self.clone();
        let (system, history, user) = (system.to_string(), history.to_vec(), user.to_string());
        tokio::task::spawn_blocking(move || client.chat(&system, &history, &user))
            .await
            .map_err(|e| BotError::Other(e.into()))?
            .map_err(|e| BotError::Completion(format!("{e:#}")))
    }
}
