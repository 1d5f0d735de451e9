//! Embedding abstraction
//!
//! Provides a unified interface over:
//! - OpenAI embedding models (text-embedding-3-small / -large, ada-002)
//! - A deterministic mock for tests

use crate::config::EmbeddingConfig;
use crate::errors::{AppError, Result};
use crate::models::EmbeddingVector;
use crate::provider::EmbeddingProvider;
use crate::tokens::TokenCounter;
use async_trait::async_trait;
use rand::{rngs::StdRng, Rng, SeedableRng};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Trait for embedding generation
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Generate embedding for a single text
    async fn embed(&self, text: &str) -> Result<EmbeddingVector>;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;
}

/// OpenAI embedding client.
///
/// Cuts overlong input to a token prefix, then makes exactly one provider
/// call. Retries, if any, happen inside the provider's transport.
pub struct OpenAIEmbedder {
    provider: Arc<dyn EmbeddingProvider>,
    tokens: TokenCounter,
    model: String,
    dimension: usize,
    max_input_tokens: usize,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        tokens: TokenCounter,
        config: &EmbeddingConfig,
    ) -> Self {
        Self {
            provider,
            tokens,
            model: config.model.clone(),
            dimension: config.dimension,
            max_input_tokens: config.max_input_tokens,
        }
    }

    /// Text actually sent to the provider
    pub fn prepare_input(&self, text: &str) -> String {
        let prepared = self.tokens.truncate(text, self.max_input_tokens);
        if prepared.len() < text.len() {
            debug!(
                original_bytes = text.len(),
                kept_bytes = prepared.len(),
                max_tokens = self.max_input_tokens,
                "Embedding input truncated"
            );
        }
        prepared
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let input = self.prepare_input(text);
        let embedding = self.provider.embed(&self.model, &input).await?;

        if embedding.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Mock embedder for testing.
///
/// Vectors are pseudo-random but seeded from the text, so equal inputs
/// always embed identically.
pub struct MockEmbedder {
    dimension: usize,
}

impl MockEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

#[async_trait]
impl Embedder for MockEmbedder {
    async fn embed(&self, text: &str) -> Result<EmbeddingVector> {
        let digest = Sha256::digest(text.as_bytes());
        let mut seed = [0u8; 32];
        seed.copy_from_slice(&digest);
        let mut rng = StdRng::from_seed(seed);
        Ok((0..self.dimension).map(|_| rng.gen::<f32>()).collect())
    }

    fn model_name(&self) -> &str {
        "mock-embedding"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Records inputs and answers with a fixed-size vector
    struct RecordingProvider {
        dimension: usize,
        inputs: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EmbeddingProvider for RecordingProvider {
        async fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>> {
            self.inputs.lock().unwrap().push(input.to_string());
            Ok(vec![0.5; self.dimension])
        }
    }

    fn embedder(provider: Arc<RecordingProvider>, dimension: usize, max_input_tokens: usize) -> OpenAIEmbedder {
        let config = EmbeddingConfig {
            model: "text-embedding-3-small".into(),
            dimension,
            max_input_tokens,
        };
        OpenAIEmbedder::new(provider, TokenCounter::new().unwrap(), &config)
    }

    #[tokio::test]
    async fn test_mock_embedder_is_deterministic() {
        let embedder = MockEmbedder::new(64);
        let a = embedder.embed("test text").await.unwrap();
        let b = embedder.embed("test text").await.unwrap();
        let c = embedder.embed("other text").await.unwrap();
        assert_eq!(a.len(), 64);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[tokio::test]
    async fn test_long_input_truncated_before_single_call() {
        let provider = Arc::new(RecordingProvider { dimension: 8, inputs: Mutex::new(Vec::new()) });
        let embedder = embedder(provider.clone(), 8, 20);
        let text = "calcium supplementation and serum lipids ".repeat(50);

        embedder.embed(&text).await.unwrap();
        embedder.embed(&text).await.unwrap();

        let inputs = provider.inputs.lock().unwrap().clone();
        assert_eq!(inputs.len(), 2);
        assert!(inputs[0].len() < text.len());
        assert!(text.starts_with(&inputs[0]));
        assert_eq!(inputs[0], inputs[1]);
    }

    #[tokio::test]
    async fn test_wrong_dimension_rejected() {
        let provider = Arc::new(RecordingProvider { dimension: 4, inputs: Mutex::new(Vec::new()) });
        let embedder = embedder(provider, 3072, 6000);

        let err = embedder.embed("short").await.unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { expected: 3072, actual: 4 }));
    }
}
