//! PubMed client over NCBI E-utilities
//!
//! Two phases per search:
//! - ESearch resolves the query to an ordered PMID list
//! - EFetch retrieves every record in one batch call
//!
//! Results keep PubMed's relevance order; nothing is re-ranked here.

mod parser;
mod transport;

pub use parser::{ensure_xml, parse_articles, parse_id_list};
pub use transport::{Endpoint, EutilsTransport, ReqwestTransport};

use super::LiteratureSearch;
use async_trait::async_trait;
use chrono::{Days, NaiveDate, Utc};
use paperscout_common::config::PubMedConfig;
use paperscout_common::errors::Result;
use paperscout_common::models::DocumentRecord;
use std::sync::Arc;
use tracing::{debug, info};

/// PubMed search client
pub struct PubMedClient {
    transport: Arc<dyn EutilsTransport>,
    database: String,
    tool: String,
    email: Option<String>,
    api_key: Option<String>,
    recent_days: Option<u32>,
}

impl PubMedClient {
    pub fn new(transport: Arc<dyn EutilsTransport>, config: &PubMedConfig) -> Self {
        Self {
            transport,
            database: config.database.clone(),
            tool: config.tool.clone(),
            email: config.email.clone(),
            api_key: config.api_key.clone(),
            recent_days: config.recent_days,
        }
    }

    /// Restrict searches to the last `days` days of publication
    pub fn with_recent_days(mut self, days: Option<u32>) -> Self {
        self.recent_days = days;
        self
    }

    /// Parameters sent with every request
    fn base_params(&self) -> Vec<(String, String)> {
        let mut params = vec![
            ("db".to_string(), self.database.clone()),
            ("retmode".to_string(), "xml".to_string()),
            ("tool".to_string(), self.tool.clone()),
        ];
        if let Some(email) = &self.email {
            params.push(("email".to_string(), email.clone()));
        }
        if let Some(key) = &self.api_key {
            params.push(("api_key".to_string(), key.clone()));
        }
        params
    }

    /// Search term with the publication-date window applied
    pub fn search_term(&self, query: &str) -> String {
        self.search_term_on(query, Utc::now().date_naive())
    }

    fn search_term_on(&self, query: &str, today: NaiveDate) -> String {
        match self.recent_days {
            Some(days) => {
                let since = today.checked_sub_days(Days::new(u64::from(days))).unwrap_or(today);
                format!("({}) AND ({}[PDAT] : 3000[PDAT])", query, since.format("%Y/%m/%d"))
            }
            None => query.to_string(),
        }
    }

    /// Phase 1: query to ordered PMIDs
    pub async fn lookup_ids(&self, query: &str, max_results: usize) -> Result<Vec<String>> {
        let mut params = self.base_params();
        params.push(("term".to_string(), self.search_term(query)));
        params.push(("retmax".to_string(), max_results.to_string()));

        let body = self.transport.get(Endpoint::ESearch, &params).await?;
        let mut ids = parse_id_list(&body)?;
        ids.truncate(max_results);
        Ok(ids)
    }

    /// Phase 2: batch fetch of full records
    pub async fn fetch(&self, ids: &[String]) -> Result<Vec<DocumentRecord>> {
        let mut params = self.base_params();
        params.push(("id".to_string(), ids.join(",")));
        params.push(("rettype".to_string(), "abstract".to_string()));

        let body = self.transport.get(Endpoint::EFetch, &params).await?;
        parse_articles(&body, ids)
    }
}

#[async_trait]
impl LiteratureSearch for PubMedClient {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<DocumentRecord>> {
        let ids = self.lookup_ids(query, max_results).await?;
        if ids.is_empty() {
            debug!(query, "No PMIDs returned, skipping fetch");
            return Ok(Vec::new());
        }

        let records = self.fetch(&ids).await?;
        info!(query, ids = ids.len(), records = records.len(), "PubMed search complete");
        Ok(records)
    }

    fn name(&self) -> &str {
        "pubmed"
    }
}
