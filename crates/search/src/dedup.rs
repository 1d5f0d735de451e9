//! Cross-source, cross-round deduplication
//!
//! Two records are the same document when their normalized titles match:
//! case-folded, whitespace collapsed, leading and trailing punctuation
//! stripped. Near-duplicates with different wording are kept apart.

use paperscout_common::models::{DocumentRecord, Source, NO_TITLE};
use std::collections::HashSet;

/// Normalized title used as the equivalence key
pub fn dedup_key(title: &str) -> String {
    let collapsed = title.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase()
}

/// Identity of a record inside a merged set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RecordKey {
    Title(String),
    /// Untitled records never merge with each other
    Untitled(Source, String),
}

fn record_key(record: &DocumentRecord) -> RecordKey {
    let key = dedup_key(&record.title);
    if key.is_empty() || key == dedup_key(NO_TITLE) {
        RecordKey::Untitled(record.source, record.id.clone())
    } else {
        RecordKey::Title(key)
    }
}

/// Records unique by title key, in first-seen order
#[derive(Debug, Clone, Default)]
pub struct MergedResultSet {
    seen: HashSet<RecordKey>,
    records: Vec<DocumentRecord>,
}

impl MergedResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a record unless an equivalent one is already present.
    ///
    /// Returns whether the record was kept. The first occurrence always
    /// wins; fields of later duplicates are discarded.
    pub fn insert(&mut self, record: DocumentRecord) -> bool {
        if self.seen.insert(record_key(&record)) {
            self.records.push(record);
            true
        } else {
            false
        }
    }

    /// Insert every record, returning how many were new
    pub fn extend<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = DocumentRecord>,
    {
        let mut added = 0;
        for record in records {
            if self.insert(record) {
                added += 1;
            }
        }
        added
    }

    /// Whether an equivalent record is present
    pub fn contains(&self, record: &DocumentRecord) -> bool {
        self.seen.contains(&record_key(record))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[DocumentRecord] {
        &self.records
    }

    pub fn into_records(self) -> Vec<DocumentRecord> {
        self.records
    }
}

/// Drop later duplicates, preserving first-seen order
pub fn dedupe(records: impl IntoIterator<Item = DocumentRecord>) -> Vec<DocumentRecord> {
    let mut merged = MergedResultSet::new();
    merged.extend(records);
    merged.into_records()
}
