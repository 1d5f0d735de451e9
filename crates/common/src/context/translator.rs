//! Query Translator - natural-language question to PubMed Boolean query
//!
//! One deterministic (temperature 0) chat call per question, with a bounded
//! output length. The instruction template can be replaced from a file.

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::provider::{ChatProvider, ChatRequest};
use std::sync::Arc;
use tracing::{debug, info};

/// Placeholder the template must contain
pub const QUESTION_PLACEHOLDER: &str = "{natural_query}";

const SYSTEM_PROMPT: &str = "You are a PubMed expert.";

const DEFAULT_TEMPLATE: &str = "You are a biomedical researcher. Convert the following natural language question into a PubMed-compatible search string using Boolean operators and MeSH terms where appropriate.

QUESTION: \"{natural_query}\"

Search string:";

/// Translates questions into external search queries
pub struct QueryTranslator {
    provider: Arc<dyn ChatProvider>,
    model: String,
    max_tokens: u32,
    template: String,
}

impl QueryTranslator {
    /// Create a translator with the built-in template
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>, max_tokens: u32) -> Self {
        Self {
            provider,
            model: model.into(),
            max_tokens,
            template: DEFAULT_TEMPLATE.to_string(),
        }
    }

    /// Build from configuration, loading the template override if one is set
    pub fn from_config(provider: Arc<dyn ChatProvider>, config: &LlmConfig) -> Result<Self> {
        let translator = Self::new(
            provider,
            config.translation_model.clone(),
            config.translation_max_tokens,
        );

        match &config.translation_template_path {
            Some(path) => {
                let template = std::fs::read_to_string(path).map_err(|e| AppError::Configuration {
                    message: format!("Cannot read translation template {}: {}", path, e),
                })?;
                translator.with_template(template)
            }
            None => Ok(translator),
        }
    }

    /// Replace the instruction template
    pub fn with_template(mut self, template: impl Into<String>) -> Result<Self> {
        let template = template.into();
        if !template.contains(QUESTION_PLACEHOLDER) {
            return Err(AppError::Configuration {
                message: format!("Translation template must contain {}", QUESTION_PLACEHOLDER),
            });
        }
        self.template = template;
        Ok(self)
    }

    /// Prompt sent for `question`
    pub fn render(&self, question: &str) -> String {
        self.template.replace(QUESTION_PLACEHOLDER, question)
    }

    /// Translate a question into a query string.
    ///
    /// Any provider failure, or an empty answer, is a `Translation` error.
    pub async fn translate(&self, question: &str) -> Result<String> {
        let request = ChatRequest::new(&self.model, SYSTEM_PROMPT, self.render(question))
            .temperature(0.0)
            .max_tokens(self.max_tokens);

        let raw = self
            .provider
            .complete(request)
            .await
            .map_err(|e| AppError::Translation {
                message: format!("Query translation failed: {}", e),
            })?;

        debug!(raw = %raw, "Translator output");

        let query = clean_query(&raw);
        if query.is_empty() {
            return Err(AppError::Translation {
                message: "Translator returned an empty query".to_string(),
            });
        }

        info!(query = %query, "Question translated");
        Ok(query)
    }
}

/// Strip whitespace, code fences and one layer of wrapping quotes
fn clean_query(raw: &str) -> String {
    let mut text = raw.trim();

    if let Some(rest) = text.strip_prefix("```") {
        // Drop an optional language tag on the fence line
        text = match rest.find('\n') {
            Some(pos) => &rest[pos + 1..],
            None => rest,
        };
        text = text.trim_end().trim_end_matches("```").trim();
    }

    for (open, close) in [('"', '"'), ('\'', '\''), ('`', '`')] {
        if text.len() >= 2 && text.starts_with(open) && text.ends_with(close) {
            text = text[1..text.len() - 1].trim();
            break;
        }
    }

    text.to_string()
}
