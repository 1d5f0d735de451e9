//! Error types for PaperScout
//!
//! Provides a single error enum for the retrieval-and-synthesis pipeline with:
//! - Distinct variants per failure class (provider, network, source, index, translation)
//! - Machine-readable error codes
//! - Transient/permanent classification used by the retry policy
//! - Process exit codes for the CLI

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    DimensionMismatch,

    // External service errors (8xxx)
    ProviderError,
    NetworkError,
    SourceUnavailable,
    TranslationError,

    // Storage errors (7xxx)
    IndexCorrupt,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::DimensionMismatch => 1002,

            // Storage (7xxx)
            ErrorCode::IndexCorrupt => 7001,

            // External (8xxx)
            ErrorCode::ProviderError => 8001,
            ErrorCode::NetworkError => 8002,
            ErrorCode::SourceUnavailable => 8003,
            ErrorCode::TranslationError => 8004,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }

    /// Stable upper-case name, as used in configuration and CLI output
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::DimensionMismatch => "DIMENSION_MISMATCH",
            ErrorCode::IndexCorrupt => "INDEX_CORRUPT",
            ErrorCode::ProviderError => "PROVIDER_ERROR",
            ErrorCode::NetworkError => "NETWORK_ERROR",
            ErrorCode::SourceUnavailable => "SOURCE_UNAVAILABLE",
            ErrorCode::TranslationError => "TRANSLATION_ERROR",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Provider errors (embedding / chat completion)
    #[error("Provider error: {message}")]
    Provider {
        message: String,
        status: Option<u16>,
    },

    #[error("Query translation failed: {message}")]
    Translation { message: String },

    // External bibliographic source
    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Source unavailable: {message}")]
    SourceUnavailable { message: String },

    // Local library
    #[error("Index corrupt: {message}")]
    IndexCorrupt { message: String },

    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    // Validation errors
    #[error("Validation failed: {message}")]
    Validation { message: String },

    // Internal errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {message}")]
    Internal { message: String },

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Provider { .. } => ErrorCode::ProviderError,
            AppError::Translation { .. } => ErrorCode::TranslationError,
            AppError::Network { .. } => ErrorCode::NetworkError,
            AppError::SourceUnavailable { .. } => ErrorCode::SourceUnavailable,
            AppError::IndexCorrupt { .. } => ErrorCode::IndexCorrupt,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Whether a second attempt at the same call could plausibly succeed.
    ///
    /// Auth and quota-style provider failures (4xx other than 429) are permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Network { .. } | AppError::SourceUnavailable { .. } => true,
            AppError::Provider { status, .. } => match status {
                None => true,
                Some(code) => *code == 429 || *code >= 500,
            },
            _ => false,
        }
    }

    /// Process exit code when this error aborts the CLI
    pub fn exit_code(&self) -> i32 {
        match self.code() {
            ErrorCode::ValidationError | ErrorCode::ConfigurationError => 2,
            ErrorCode::IndexCorrupt | ErrorCode::DimensionMismatch => 3,
            ErrorCode::TranslationError => 4,
            ErrorCode::ProviderError => 5,
            ErrorCode::NetworkError | ErrorCode::SourceUnavailable => 6,
            ErrorCode::InternalError | ErrorCode::SerializationError => 1,
        }
    }

    /// Map a transport failure from reqwest talking to the external source
    pub fn from_source_transport(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            AppError::Network {
                message: err.to_string(),
            }
        } else {
            AppError::SourceUnavailable {
                message: err.to_string(),
            }
        }
    }

    /// Map a transport failure from reqwest talking to a model provider
    pub fn from_provider_transport(err: reqwest::Error) -> Self {
        AppError::Provider {
            status: err.status().map(|s| s.as_u16()),
            message: format!("Request failed: {}", err),
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}
