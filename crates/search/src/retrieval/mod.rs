//! Retrieval sources
//!
//! Two sources feed the pipeline:
//! - Local library (embedding + exact L2 search over a FAISS flat index)
//! - PubMed E-utilities (two-phase id lookup then batch fetch)

mod local;
pub mod pubmed;
mod vector_index;

pub use local::LocalLibrary;
pub use pubmed::PubMedClient;
pub use vector_index::{Authors, MetadataEntry, VectorIndex, Year};

use async_trait::async_trait;
use paperscout_common::errors::Result;
use paperscout_common::models::DocumentRecord;
use std::collections::HashMap;
use std::sync::Mutex;

/// Common trait for external literature sources
#[async_trait]
pub trait LiteratureSearch: Send + Sync {
    /// Records for `query`, in the source's own relevance order
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<DocumentRecord>>;

    /// Source name for logs
    fn name(&self) -> &str;
}

/// Scripted search source for tests.
///
/// Unknown queries return no results. Every call is recorded.
#[derive(Default)]
pub struct ScriptedSearch {
    responses: HashMap<String, Result<Vec<DocumentRecord>>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedSearch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `query` with `records`
    pub fn on(mut self, query: impl Into<String>, records: Vec<DocumentRecord>) -> Self {
        self.responses.insert(query.into(), Ok(records));
        self
    }

    /// Fail `query` with `error`
    pub fn failing(mut self, query: impl Into<String>, error: paperscout_common::AppError) -> Self {
        self.responses.insert(query.into(), Err(error));
        self
    }

    /// Queries seen so far, in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LiteratureSearch for ScriptedSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<DocumentRecord>> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(query.to_string());
        }

        match self.responses.get(query) {
            Some(Ok(records)) => Ok(records.iter().take(max_results).cloned().collect()),
            Some(Err(e)) => Err(clone_error(e)),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// `AppError` is not `Clone`; rebuild the variants a search can fail with
fn clone_error(error: &paperscout_common::AppError) -> paperscout_common::AppError {
    use paperscout_common::AppError;
    match error {
        AppError::Network { message } => AppError::Network { message: message.clone() },
        AppError::SourceUnavailable { message } => AppError::SourceUnavailable {
            message: message.clone(),
        },
        other => AppError::Internal { message: other.to_string() },
    }
}
