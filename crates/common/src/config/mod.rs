//! Configuration management for PaperScout
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use crate::errors::{AppError, ErrorCode, Result};
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// OpenAI-compatible provider
    pub openai: OpenAIConfig,

    /// Embedding model settings
    pub embedding: EmbeddingConfig,

    /// Chat model settings per stage
    pub llm: LlmConfig,

    /// PubMed E-utilities
    pub pubmed: PubMedConfig,

    /// Local library (vector index + metadata)
    pub library: LibraryConfig,

    /// Query refinement
    pub refinement: RefinementConfig,

    /// Synthesis context budget
    pub synthesis: SynthesisConfig,

    /// Transport retry policy
    pub retry: RetryConfig,

    /// Observability configuration
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OpenAIConfig {
    /// API key (falls back to OPENAI_API_KEY)
    pub api_key: Option<String>,

    /// API base URL
    pub api_base: String,

    /// Request timeout in seconds
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// Model to use
    pub model: String,

    /// Embedding dimension
    pub dimension: usize,

    /// Inputs longer than this are cut to a token prefix
    pub max_input_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LlmConfig {
    pub translation_model: String,
    pub translation_max_tokens: u32,

    /// Optional file replacing the built-in translation template
    pub translation_template_path: Option<String>,

    pub refinement_model: String,

    pub synthesis_model: String,
    pub synthesis_temperature: Option<f32>,
    pub synthesis_max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PubMedConfig {
    /// E-utilities base URL
    pub base_url: String,

    /// Entrez database
    pub database: String,

    /// Identifiers requested per query
    pub max_results: usize,

    /// NCBI API key (falls back to NCBI_API_KEY)
    pub api_key: Option<String>,

    /// Contact address sent with each request
    pub email: Option<String>,

    /// Tool name sent with each request
    pub tool: String,

    /// Overrides the NCBI default of 3 req/s (10 with a key)
    pub requests_per_second: Option<u32>,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Restrict results to the last N days of publications
    pub recent_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// FAISS flat-L2 index file
    pub index_path: String,

    /// JSON metadata store, positionally aligned with the index
    pub metadata_path: String,

    /// Nearest neighbours retrieved per question
    pub top_k: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Refinement rounds after the seed search
    pub rounds: usize,

    /// Alternate queries requested per round
    pub fan_out: usize,

    /// Results summarized into each refinement prompt
    pub digest_size: usize,

    /// Issue a round's alternate searches concurrently
    pub concurrent: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Token budget for all formatted evidence in one prompt
    pub max_context_tokens: usize,

    /// Token cap for a single formatted record
    pub max_document_tokens: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per call, including the first
    pub max_attempts: u32,

    pub initial_backoff_ms: u64,

    pub max_backoff_ms: u64,

    pub multiplier: f64,

    /// Error kinds eligible for retry
    pub retry_on: Vec<ErrorCode>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    pub log_level: String,

    /// Enable JSON logging
    pub json_logging: bool,
}

// Default value functions
fn default_api_base() -> String { "https://api.openai.com/v1".to_string() }
fn default_openai_timeout() -> u64 { 120 }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_max_input_tokens() -> usize { 6000 }
fn default_translation_model() -> String { "gpt-4".to_string() }
fn default_translation_max_tokens() -> u32 { 200 }
fn default_refinement_model() -> String { "gpt-4o-mini".to_string() }
fn default_synthesis_model() -> String { "gpt-4".to_string() }
fn default_pubmed_base() -> String { "https://eutils.ncbi.nlm.nih.gov/entrez/eutils".to_string() }
fn default_database() -> String { "pubmed".to_string() }
fn default_max_results() -> usize { 10 }
fn default_tool() -> String { "paperscout".to_string() }
fn default_pubmed_timeout() -> u64 { 30 }
fn default_index_path() -> String { "library.index".to_string() }
fn default_metadata_path() -> String { "library_meta.json".to_string() }
fn default_top_k() -> usize { 5 }
fn default_rounds() -> usize { 1 }
fn default_fan_out() -> usize { 3 }
fn default_digest_size() -> usize { 10 }
fn default_max_context_tokens() -> usize { 12_000 }
fn default_max_document_tokens() -> usize { 1_000 }
fn default_max_attempts() -> u32 { 3 }
fn default_initial_backoff() -> u64 { 500 }
fn default_max_backoff() -> u64 { 8_000 }
fn default_multiplier() -> f64 { 2.0 }
fn default_retry_on() -> Vec<ErrorCode> {
    vec![
        ErrorCode::NetworkError,
        ErrorCode::SourceUnavailable,
        ErrorCode::ProviderError,
    ]
}
fn default_log_level() -> String { "info".to_string() }

/// Upper bound on refinement rounds accepted from configuration
pub const MAX_REFINEMENT_ROUNDS: usize = 5;

impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base: default_api_base(),
            timeout_secs: default_openai_timeout(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            max_input_tokens: default_max_input_tokens(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            translation_model: default_translation_model(),
            translation_max_tokens: default_translation_max_tokens(),
            translation_template_path: None,
            refinement_model: default_refinement_model(),
            synthesis_model: default_synthesis_model(),
            synthesis_temperature: None,
            synthesis_max_tokens: None,
        }
    }
}

impl Default for PubMedConfig {
    fn default() -> Self {
        Self {
            base_url: default_pubmed_base(),
            database: default_database(),
            max_results: default_max_results(),
            api_key: None,
            email: None,
            tool: default_tool(),
            requests_per_second: None,
            timeout_secs: default_pubmed_timeout(),
            recent_days: None,
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            index_path: default_index_path(),
            metadata_path: default_metadata_path(),
            top_k: default_top_k(),
        }
    }
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            rounds: default_rounds(),
            fan_out: default_fan_out(),
            digest_size: default_digest_size(),
            concurrent: true,
        }
    }
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: default_max_context_tokens(),
            max_document_tokens: default_max_document_tokens(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            multiplier: default_multiplier(),
            retry_on: default_retry_on(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> std::result::Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__PUBMED__MAX_RESULTS=20
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        let mut loaded: Self = config.try_deserialize()?;
        loaded.apply_env_fallbacks();
        Ok(loaded)
    }

    /// Load from a specific file, still honoring APP__ overrides
    pub fn from_file(path: &str) -> std::result::Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        let mut loaded: Self = config.try_deserialize()?;
        loaded.apply_env_fallbacks();
        Ok(loaded)
    }

    /// Fill keys from the conventional provider variables when unset
    fn apply_env_fallbacks(&mut self) {
        if self.openai.api_key.is_none() {
            self.openai.api_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        }
        if self.pubmed.api_key.is_none() {
            self.pubmed.api_key = std::env::var("NCBI_API_KEY").ok().filter(|k| !k.is_empty());
        }
    }

    /// Reject settings the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.openai.api_key.as_deref().map_or(true, str::is_empty) {
            return Err(AppError::Configuration {
                message: "OpenAI API key missing (set OPENAI_API_KEY or APP__OPENAI__API_KEY)".to_string(),
            });
        }
        if self.pubmed.max_results == 0 {
            return Err(invalid("pubmed.max_results must be at least 1"));
        }
        if self.library.top_k == 0 {
            return Err(invalid("library.top_k must be at least 1"));
        }
        if self.refinement.fan_out == 0 {
            return Err(invalid("refinement.fan_out must be at least 1"));
        }
        if self.refinement.rounds > MAX_REFINEMENT_ROUNDS {
            return Err(invalid(&format!(
                "refinement.rounds must be at most {}",
                MAX_REFINEMENT_ROUNDS
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts must be at least 1"));
        }
        Ok(())
    }

    /// Get OpenAI timeout as Duration
    pub fn openai_timeout(&self) -> Duration {
        Duration::from_secs(self.openai.timeout_secs)
    }

    /// Get PubMed timeout as Duration
    pub fn pubmed_timeout(&self) -> Duration {
        Duration::from_secs(self.pubmed.timeout_secs)
    }

    /// Effective E-utilities request rate
    pub fn pubmed_requests_per_second(&self) -> u32 {
        self.pubmed.requests_per_second.unwrap_or(if self.pubmed.api_key.is_some() {
            10
        } else {
            3
        })
    }
}

fn invalid(message: &str) -> AppError {
    AppError::Configuration {
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn with_key() -> AppConfig {
        let mut config = AppConfig::default();
        config.openai.api_key = Some("sk-test".into());
        config
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.embedding.model, "text-embedding-3-large");
        assert_eq!(config.embedding.max_input_tokens, 6000);
        assert_eq!(config.refinement.rounds, 1);
        assert_eq!(config.refinement.fan_out, 3);
        assert_eq!(config.llm.translation_max_tokens, 200);
    }

    #[test]
    fn test_validate_requires_api_key() {
        let err = AppConfig::default().validate().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfigurationError);
        assert!(with_key().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_fan_out() {
        let mut config = with_key();
        config.refinement.fan_out = 0;
        assert!(config.validate().is_err());

        let mut config = with_key();
        config.refinement.rounds = MAX_REFINEMENT_ROUNDS + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_follows_api_key() {
        let mut config = AppConfig::default();
        assert_eq!(config.pubmed_requests_per_second(), 3);
        config.pubmed.api_key = Some("ncbi".into());
        assert_eq!(config.pubmed_requests_per_second(), 10);
        config.pubmed.requests_per_second = Some(1);
        assert_eq!(config.pubmed_requests_per_second(), 1);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[pubmed]\nmax_results = 25\n\n[refinement]\nfan_out = 2\n\n[retry]\nretry_on = [\"NETWORK_ERROR\"]"
        )
        .unwrap();

        let config = AppConfig::from_file(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.pubmed.max_results, 25);
        assert_eq!(config.pubmed.database, "pubmed");
        assert_eq!(config.refinement.fan_out, 2);
        assert_eq!(config.refinement.rounds, 1);
        assert_eq!(config.retry.retry_on, vec![ErrorCode::NetworkError]);
    }
}
