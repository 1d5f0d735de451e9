//! PaperScout Search Library
//!
//! Everything that fetches evidence:
//! - Local library search (embedding + FAISS flat L2 index)
//! - PubMed E-utilities client
//! - Cross-source deduplication
//! - Iterative query refinement

pub mod dedup;
pub mod refinement;
pub mod retrieval;

pub use dedup::{dedup_key, dedupe, MergedResultSet};
pub use refinement::{IterativeRefiner, RefinementOutcome, RefinementRound, RefinerSettings};
pub use retrieval::{LiteratureSearch, LocalLibrary, PubMedClient, VectorIndex};
