//! Shared record types
//!
//! A `DocumentRecord` is the unit of evidence flowing through the pipeline,
//! whether it came from the local library or from PubMed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Title used when a source omits one
pub const NO_TITLE: &str = "No title";

/// Abstract used when a source omits one
pub const NO_ABSTRACT: &str = "[No abstract available]";

/// Year used when a source omits one
pub const NO_YEAR: &str = "n.d.";

/// Dense embedding, fixed length per model
pub type EmbeddingVector = Vec<f32>;

/// Where a record came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// Personal library (vector index)
    Local,
    /// External bibliographic search
    External,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Local => write!(f, "local"),
            Source::External => write!(f, "external"),
        }
    }
}

/// Canonical unit of evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// PMID for external records, library key for local ones
    pub id: String,

    pub title: String,

    /// Ordered author display names
    pub authors: Vec<String>,

    /// Publication year, or `n.d.`
    pub year: String,

    #[serde(rename = "abstract")]
    pub abstract_text: String,

    pub source: Source,
}

impl DocumentRecord {
    /// Build a record, substituting sentinels for blank fields
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        authors: Vec<String>,
        year: impl Into<String>,
        abstract_text: impl Into<String>,
        source: Source,
    ) -> Self {
        let title = or_sentinel(title.into(), NO_TITLE);
        let year = or_sentinel(year.into(), NO_YEAR);
        let abstract_text = or_sentinel(abstract_text.into(), NO_ABSTRACT);
        let authors = authors
            .into_iter()
            .map(|a| a.trim().to_string())
            .filter(|a| !a.is_empty())
            .collect();

        Self {
            id: id.into(),
            title,
            authors,
            year,
            abstract_text,
            source,
        }
    }

    /// Authors joined for display
    pub fn authors_display(&self) -> String {
        self.authors.join(", ")
    }

    /// Formatted block fed to embedding and synthesis.
    ///
    /// Always derived from the other fields, never stored.
    pub fn raw(&self) -> String {
        format!(
            "Title: {}\nAuthors: {}\nYear: {}\nAbstract: {}",
            self.title,
            self.authors_display(),
            self.year,
            self.abstract_text
        )
    }

    /// Whether the title is the missing-title sentinel
    pub fn has_title(&self) -> bool {
        self.title != NO_TITLE
    }

    /// Copy of this record with a replacement abstract
    pub fn with_abstract(&self, abstract_text: impl Into<String>) -> Self {
        Self {
            abstract_text: or_sentinel(abstract_text.into(), NO_ABSTRACT),
            ..self.clone()
        }
    }
}

fn or_sentinel(value: String, sentinel: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        sentinel.to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinels_fill_blank_fields() {
        let record = DocumentRecord::new("1", "  ", vec![], "", "", Source::External);
        assert_eq!(record.title, NO_TITLE);
        assert_eq!(record.year, NO_YEAR);
        assert_eq!(record.abstract_text, NO_ABSTRACT);
        assert!(!record.has_title());
    }

    #[test]
    fn test_raw_is_derived_from_fields() {
        let record = DocumentRecord::new(
            "12345",
            "Calcium and cholesterol",
            vec!["John Doe".into(), " ".into(), "Jane Smith".into()],
            "2023",
            "Abstract 1",
            Source::External,
        );
        assert_eq!(
            record.raw(),
            "Title: Calcium and cholesterol\nAuthors: John Doe, Jane Smith\nYear: 2023\nAbstract: Abstract 1"
        );

        let shortened = record.with_abstract("Abs");
        assert!(shortened.raw().ends_with("Abstract: Abs"));
        assert_eq!(shortened.title, record.title);
    }

    #[test]
    fn test_abstract_serializes_under_plain_key() {
        let record = DocumentRecord::new("k", "T", vec![], "2020", "A", Source::Local);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["abstract"], "A");
        assert_eq!(json["source"], "local");
    }
}
