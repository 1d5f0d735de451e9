//! Context Engine Core Components
//!
//! The language-model side of the pipeline:
//! - Question to PubMed query translation
//! - Token budgeting of retrieved evidence
//! - Answer synthesis

mod context_budget;
mod synthesizer;
mod translator;

pub use context_budget::{BudgetSummary, BudgetedContext, ContextBudget, TRUNCATION_MARKER};
pub use synthesizer::{format_records, SynthesisOptions, Synthesizer};
pub use translator::{QueryTranslator, QUESTION_PLACEHOLDER};
