//! Semantic search over the personal library

use super::VectorIndex;
use paperscout_common::config::LibraryConfig;
use paperscout_common::embeddings::Embedder;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::DocumentRecord;
use std::sync::Arc;
use tracing::{debug, info};

/// Embedder + vector index
pub struct LocalLibrary {
    embedder: Arc<dyn Embedder>,
    index: Arc<VectorIndex>,
}

impl LocalLibrary {
    /// Pair an embedder with an index of the same dimension
    pub fn new(embedder: Arc<dyn Embedder>, index: Arc<VectorIndex>) -> Result<Self> {
        if !index.is_empty() && embedder.dimension() != index.dimension() {
            return Err(AppError::DimensionMismatch {
                expected: index.dimension(),
                actual: embedder.dimension(),
            });
        }
        Ok(Self { embedder, index })
    }

    /// Open the configured index files
    pub fn open(config: &LibraryConfig, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let index = VectorIndex::open(&config.index_path, &config.metadata_path)?;
        Self::new(embedder, Arc::new(index))
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    /// Top `k` library records for a question, nearest first
    pub async fn search(&self, question: &str, k: usize) -> Result<Vec<DocumentRecord>> {
        if self.index.is_empty() {
            debug!("Library index is empty, skipping embedding");
            return Ok(Vec::new());
        }

        let query = self.embedder.embed(question).await?;
        let records = self.index.search(&query, k)?;

        info!(
            k,
            found = records.len(),
            model = self.embedder.model_name(),
            "Library search complete"
        );
        Ok(records)
    }
}
