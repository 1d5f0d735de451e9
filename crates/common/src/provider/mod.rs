//! Model provider client
//!
//! One explicitly constructed `OpenAIClient` is shared by the embedder,
//! translator, refiner and synthesizer. Components only see the
//! `ChatProvider` / `EmbeddingProvider` traits, so tests swap in doubles.

mod mock;

pub use mock::MockChatProvider;

use crate::config::AppConfig;
use crate::errors::{AppError, Result};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One (role, content) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
}

/// Chat completion request
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ChatRequest {
    /// System + user prompt pair
    pub fn new(model: impl Into<String>, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::system(system), ChatMessage::user(user)],
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Content of the last user message
    pub fn user_prompt(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Non-streaming chat completion
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// Generated text of the first choice
    async fn complete(&self, request: ChatRequest) -> Result<String>;
}

/// Raw embedding call, one input per request
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>>;
}

/// OpenAI-compatible HTTP client
pub struct OpenAIClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    retry: RetryPolicy,
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: Vec<&'a str>,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAIClient {
    /// Create a new client
    pub fn new(
        api_key: impl Into<String>,
        base_url: impl Into<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry,
        })
    }

    /// Build from application configuration
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let api_key = config.openai.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "OpenAI API key missing".to_string(),
        })?;
        Self::new(
            api_key,
            config.openai.api_base.clone(),
            config.openai_timeout(),
            RetryPolicy::from_config(&config.retry),
        )
    }

    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let url = format!("{}/{}", self.base_url, path);
        let url = url.as_str();
        let client = &self.client;
        let api_key = self.api_key.as_str();

        self.retry
            .run(path, || async move {
                let response = client
                    .post(url)
                    .header("Authorization", format!("Bearer {}", api_key))
                    .json(body)
                    .send()
                    .await
                    .map_err(AppError::from_provider_transport)?;

                if !response.status().is_success() {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(AppError::Provider {
                        message: format!("API error {}: {}", status, body),
                        status: Some(status.as_u16()),
                    });
                }

                response.json::<R>().await.map_err(|e| AppError::Provider {
                    message: format!("Failed to parse response: {}", e),
                    status: None,
                })
            })
            .await
    }
}

#[async_trait]
impl ChatProvider for OpenAIClient {
    async fn complete(&self, request: ChatRequest) -> Result<String> {
        debug!(model = %request.model, messages = request.messages.len(), "Chat completion request");

        let response: ChatResponse = self.post_json("chat/completions", &request).await?;

        response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::Provider {
                message: "Empty response from LLM".to_string(),
                status: None,
            })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIClient {
    async fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest { input: vec![input], model };

        let response: EmbeddingResponse = self.post_json("embeddings", &request).await?;

        response
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| AppError::Provider {
                message: "Empty embedding response".to_string(),
                status: None,
            })
    }
}
