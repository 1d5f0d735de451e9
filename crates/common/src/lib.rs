//! PaperScout Common Library
//!
//! Shared code for the PaperScout crates including:
//! - Document records and sentinels
//! - Error types and handling
//! - Configuration management
//! - Provider client (chat + embeddings) with a uniform retry policy
//! - Token accounting
//! - Context engine: query translation, context budgeting, synthesis

pub mod config;
pub mod context;
pub mod embeddings;
pub mod errors;
pub mod models;
pub mod provider;
pub mod retry;
pub mod tokens;

// Re-export commonly used types
pub use config::AppConfig;
pub use embeddings::Embedder;
pub use errors::{AppError, ErrorCode, Result};
pub use models::{DocumentRecord, Source};
pub use provider::{ChatProvider, ChatRequest, OpenAIClient};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default embedding model
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-large";

/// Default embedding dimension
pub const DEFAULT_EMBEDDING_DIMENSION: usize = 3072;
