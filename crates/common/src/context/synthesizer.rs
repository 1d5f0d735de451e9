//! LLM Synthesizer - one evidence-grounded answer from both result sets
//!
//! Provides:
//! - Prompt assembly over local and external evidence
//! - A single non-streaming chat call
//!
//! Callers fit the evidence into a `ContextBudget` first; nothing here
//! shortens the prompt.

use crate::config::LlmConfig;
use crate::errors::Result;
use crate::models::DocumentRecord;
use crate::provider::{ChatProvider, ChatRequest};
use std::sync::Arc;
use tracing::info;

const SYSTEM_PROMPT: &str = "You are a biomedical research assistant.";

const EMPTY_RESULTS: &str = "(no results)";

/// Synthesis options
#[derive(Debug, Clone, Default)]
pub struct SynthesisOptions {
    /// Sampling temperature, provider default when unset
    pub temperature: Option<f32>,

    /// Output cap, provider default when unset
    pub max_tokens: Option<u32>,
}

/// Synthesizer for generating answers
pub struct Synthesizer {
    provider: Arc<dyn ChatProvider>,
    model: String,
    options: SynthesisOptions,
}

impl Synthesizer {
    /// Create a new synthesizer
    pub fn new(provider: Arc<dyn ChatProvider>, model: impl Into<String>, options: SynthesisOptions) -> Self {
        Self {
            provider,
            model: model.into(),
            options,
        }
    }

    pub fn from_config(provider: Arc<dyn ChatProvider>, config: &LlmConfig) -> Self {
        Self::new(
            provider,
            config.synthesis_model.clone(),
            SynthesisOptions {
                temperature: config.synthesis_temperature,
                max_tokens: config.synthesis_max_tokens,
            },
        )
    }

    /// Synthesize an answer from both result sets.
    ///
    /// Provider failures propagate unchanged; there is no fallback answer.
    pub async fn synthesize(
        &self,
        question: &str,
        local: &[DocumentRecord],
        external: &[DocumentRecord],
    ) -> Result<String> {
        let prompt = build_prompt(question, local, external);

        let mut request = ChatRequest::new(&self.model, SYSTEM_PROMPT, prompt);
        if let Some(temperature) = self.options.temperature {
            request = request.temperature(temperature);
        }
        if let Some(max_tokens) = self.options.max_tokens {
            request = request.max_tokens(max_tokens);
        }

        let answer = self.provider.complete(request).await?;

        info!(
            local = local.len(),
            external = external.len(),
            answer_chars = answer.len(),
            "Answer synthesized"
        );
        Ok(answer)
    }
}

/// Records as `raw` blocks separated by blank lines
pub fn format_records(records: &[DocumentRecord]) -> String {
    if records.is_empty() {
        return EMPTY_RESULTS.to_string();
    }
    records
        .iter()
        .map(DocumentRecord::raw)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn build_prompt(question: &str, local: &[DocumentRecord], external: &[DocumentRecord]) -> String {
    format!(
        "You are a biomedical research assistant. I asked two agents to find papers on the same topic.

Agent 1 searched my personal library.
Agent 2 searched PubMed.

Your tasks:
1. Answer the question using evidence from both sources.
2. Identify important PubMed papers not present in my library.
3. Recommend whether to add them to my library.

QUESTION:
{}

LIBRARY RESULTS:
{}

PUBMED RESULTS:
{}
",
        question,
        format_records(local),
        format_records(external)
    )
}
