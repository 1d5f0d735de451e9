//! Context Budget - bounds the evidence fed to synthesis
//!
//! Two limits apply:
//! - per document: an abstract is cut so the record's formatted block fits
//!   `max_document_tokens`, and the cut is marked
//! - per prompt: records are admitted greedily, local first then external,
//!   and any record that would overflow `max_context_tokens` is skipped

use crate::config::SynthesisConfig;
use crate::models::DocumentRecord;
use crate::tokens::TokenCounter;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Suffix appended to a shortened abstract
pub const TRUNCATION_MARKER: &str = " [truncated]";

/// Evidence that fits the synthesis prompt
#[derive(Debug, Clone, Default)]
pub struct BudgetedContext {
    pub local: Vec<DocumentRecord>,
    pub external: Vec<DocumentRecord>,

    /// Tokens used by admitted records
    pub tokens_used: usize,

    /// Records whose abstract was shortened
    pub truncated: usize,

    /// Records left out entirely
    pub dropped: usize,
}

/// Budget report carried into the answer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BudgetSummary {
    pub tokens_used: usize,
    pub truncated: usize,
    pub dropped: usize,
}

impl BudgetedContext {
    pub fn summary(&self) -> BudgetSummary {
        BudgetSummary {
            tokens_used: self.tokens_used,
            truncated: self.truncated,
            dropped: self.dropped,
        }
    }
}

/// Token budget applied before synthesis
#[derive(Debug, Clone)]
pub struct ContextBudget {
    tokens: TokenCounter,
    max_context_tokens: usize,
    max_document_tokens: usize,
}

impl ContextBudget {
    pub fn new(tokens: TokenCounter, max_context_tokens: usize, max_document_tokens: usize) -> Self {
        Self {
            tokens,
            max_context_tokens,
            max_document_tokens,
        }
    }

    pub fn from_config(tokens: TokenCounter, config: &SynthesisConfig) -> Self {
        Self::new(tokens, config.max_context_tokens, config.max_document_tokens)
    }

    /// Fit both result sets into the budget
    pub fn apply(&self, local: &[DocumentRecord], external: &[DocumentRecord]) -> BudgetedContext {
        let mut context = BudgetedContext::default();

        for (records, is_local) in [(local, true), (external, false)] {
            for record in records {
                let (fitted, was_cut) = self.fit_document(record);
                let cost = self.tokens.count(&fitted.raw());

                if context.tokens_used + cost > self.max_context_tokens {
                    debug!(id = %record.id, cost, used = context.tokens_used, "Record skipped, context budget full");
                    context.dropped += 1;
                    continue;
                }

                context.tokens_used += cost;
                if was_cut {
                    context.truncated += 1;
                }
                if is_local {
                    context.local.push(fitted);
                } else {
                    context.external.push(fitted);
                }
            }
        }

        debug!(
            tokens_used = context.tokens_used,
            truncated = context.truncated,
            dropped = context.dropped,
            "Context budget applied"
        );
        context
    }

    /// Shorten the abstract until the formatted record fits one document's share
    fn fit_document(&self, record: &DocumentRecord) -> (DocumentRecord, bool) {
        if self.tokens.count(&record.raw()) <= self.max_document_tokens {
            return (record.clone(), false);
        }

        let overhead = self.tokens.count(&record.with_abstract(TRUNCATION_MARKER).raw());
        let mut allowance = self.max_document_tokens.saturating_sub(overhead);

        loop {
            let cut = self.tokens.truncate(&record.abstract_text, allowance);
            let candidate = record.with_abstract(format!("{}{}", cut.trim_end(), TRUNCATION_MARKER));
            if allowance == 0 || self.tokens.count(&candidate.raw()) <= self.max_document_tokens {
                return (candidate, true);
            }
            allowance -= 1;
        }
    }
}
