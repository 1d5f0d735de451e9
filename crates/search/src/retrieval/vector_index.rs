//! Exact L2 nearest-neighbor index over the personal library
//!
//! Two artifacts back an index:
//! - a FAISS `IndexFlatL2` file holding the embeddings in insertion order
//! - a JSON metadata array whose position `i` describes vector `i`
//!
//! The index is opened read-only. Any disagreement between the two
//! artifacts is reported as `IndexCorrupt`.

use crate::dedup::dedup_key;
use paperscout_common::errors::{AppError, Result};
use paperscout_common::models::{DocumentRecord, EmbeddingVector, Source};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

const FOURCC_FLAT_L2: &[u8; 4] = b"IxF2";
const METRIC_L2: i32 = 1;
/// Header words FAISS writes but never reads back
const HEADER_DUMMY: i64 = 1 << 20;

/// One metadata entry as written by the library builder
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetadataEntry {
    #[serde(default)]
    pub id: Option<String>,

    #[serde(default)]
    pub title: Option<String>,

    #[serde(default)]
    pub authors: Option<Authors>,

    #[serde(default)]
    pub year: Option<Year>,

    #[serde(default, rename = "abstract")]
    pub abstract_text: Option<String>,
}

/// Authors stored either as a list or as one display string
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Authors {
    List(Vec<String>),
    Display(String),
}

/// Year stored either as text or as a number
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Year {
    Text(String),
    Number(i64),
}

impl MetadataEntry {
    fn into_record(self, position: usize) -> DocumentRecord {
        let authors = match self.authors {
            Some(Authors::List(list)) => list,
            Some(Authors::Display(text)) => text.split(';').map(str::to_string).collect(),
            None => Vec::new(),
        };
        let year = match self.year {
            Some(Year::Text(text)) => text,
            Some(Year::Number(n)) => n.to_string(),
            None => String::new(),
        };

        DocumentRecord::new(
            self.id.unwrap_or_else(|| position.to_string()),
            self.title.unwrap_or_default(),
            authors,
            year,
            self.abstract_text.unwrap_or_default(),
            Source::Local,
        )
    }

    fn from_record(record: &DocumentRecord) -> Self {
        Self {
            id: Some(record.id.clone()),
            title: Some(record.title.clone()),
            authors: Some(Authors::List(record.authors.clone())),
            year: Some(Year::Text(record.year.clone())),
            abstract_text: Some(record.abstract_text.clone()),
        }
    }
}

/// In-memory flat index with its metadata
#[derive(Debug, Clone)]
pub struct VectorIndex {
    dimension: usize,
    /// Row-major, `len() * dimension` floats
    vectors: Vec<f32>,
    records: Vec<DocumentRecord>,
    title_keys: HashSet<String>,
}

impl VectorIndex {
    /// Empty index of the given dimension
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            vectors: Vec::new(),
            records: Vec::new(),
            title_keys: HashSet::new(),
        }
    }

    /// Build from parallel vectors and records
    pub fn from_parts(
        dimension: usize,
        vectors: Vec<EmbeddingVector>,
        records: Vec<DocumentRecord>,
    ) -> Result<Self> {
        if vectors.len() != records.len() {
            return Err(corrupt(format!(
                "{} vectors but {} metadata entries",
                vectors.len(),
                records.len()
            )));
        }

        let mut flat = Vec::with_capacity(vectors.len() * dimension);
        for vector in &vectors {
            if vector.len() != dimension {
                return Err(AppError::DimensionMismatch {
                    expected: dimension,
                    actual: vector.len(),
                });
            }
            flat.extend_from_slice(vector);
        }

        Ok(Self::assemble(dimension, flat, records))
    }

    fn assemble(dimension: usize, vectors: Vec<f32>, records: Vec<DocumentRecord>) -> Self {
        let title_keys = records
            .iter()
            .filter(|r| r.has_title())
            .map(|r| dedup_key(&r.title))
            .filter(|k| !k.is_empty())
            .collect();

        Self {
            dimension,
            vectors,
            records,
            title_keys,
        }
    }

    /// Open the index file and its metadata store
    pub fn open(index_path: impl AsRef<Path>, metadata_path: impl AsRef<Path>) -> Result<Self> {
        let index_path = index_path.as_ref();
        let metadata_path = metadata_path.as_ref();

        let bytes = std::fs::read(index_path)
            .map_err(|e| corrupt(format!("Cannot read index {}: {}", index_path.display(), e)))?;
        let (dimension, count, vectors) = decode_flat_l2(&bytes)?;

        let text = std::fs::read_to_string(metadata_path).map_err(|e| {
            corrupt(format!("Cannot read metadata {}: {}", metadata_path.display(), e))
        })?;
        let entries: Vec<MetadataEntry> = serde_json::from_str(&text).map_err(|e| {
            corrupt(format!("Malformed metadata {}: {}", metadata_path.display(), e))
        })?;

        if entries.len() != count {
            return Err(corrupt(format!(
                "Index holds {} vectors but metadata has {} entries",
                count,
                entries.len()
            )));
        }

        let records = entries
            .into_iter()
            .enumerate()
            .map(|(i, entry)| entry.into_record(i))
            .collect();

        info!(
            path = %index_path.display(),
            documents = count,
            dimension,
            "Vector index loaded"
        );
        Ok(Self::assemble(dimension, vectors, records))
    }

    /// Write both artifacts in the format `open` reads
    pub fn save(
        &self,
        index_path: impl AsRef<Path>,
        metadata_path: impl AsRef<Path>,
    ) -> Result<()> {
        let index_path = index_path.as_ref();
        let metadata_path = metadata_path.as_ref();

        std::fs::write(index_path, encode_flat_l2(self.dimension, &self.vectors)).map_err(|e| {
            AppError::Internal {
                message: format!("Cannot write index {}: {}", index_path.display(), e),
            }
        })?;

        let entries: Vec<MetadataEntry> =
            self.records.iter().map(MetadataEntry::from_record).collect();
        std::fs::write(metadata_path, serde_json::to_vec_pretty(&entries)?).map_err(|e| {
            AppError::Internal {
                message: format!("Cannot write metadata {}: {}", metadata_path.display(), e),
            }
        })?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn records(&self) -> &[DocumentRecord] {
        &self.records
    }

    /// Positions and squared L2 distances of the `k` nearest vectors.
    ///
    /// Nearest first; equal distances keep insertion order. `k` larger than
    /// the index is clamped.
    pub fn search_scored(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        if query.len() != self.dimension {
            return Err(AppError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        if self.is_empty() || k == 0 {
            return Ok(Vec::new());
        }

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(self.dimension)
            .map(|row| squared_l2(row, query))
            .enumerate()
            .collect();

        scored.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        scored.truncate(k.min(self.len()));
        Ok(scored)
    }

    /// Records of the `k` nearest vectors, nearest first
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<DocumentRecord>> {
        Ok(self
            .search_scored(query, k)?
            .into_iter()
            .map(|(position, _)| self.records[position].clone())
            .collect())
    }

    /// Whether a record with an equivalent title is in the library
    pub fn contains_title(&self, title: &str) -> bool {
        self.title_keys.contains(&dedup_key(title))
    }
}

fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

fn corrupt(message: String) -> AppError {
    AppError::IndexCorrupt { message }
}

/// Little-endian cursor over the index bytes
struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self
            .offset
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or_else(|| corrupt(format!("Index truncated at byte {}", self.offset)))?;
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn i32(&mut self) -> Result<i32> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    fn i64(&mut self) -> Result<i64> {
        Ok(i64::from_le_bytes(self.array()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.array()?))
    }
}

/// Parse an `IndexFlatL2` file into (dimension, count, row-major floats)
fn decode_flat_l2(bytes: &[u8]) -> Result<(usize, usize, Vec<f32>)> {
    let mut reader = ByteReader { bytes, offset: 0 };

    let fourcc = reader.take(4)?;
    if fourcc != FOURCC_FLAT_L2 {
        return Err(corrupt(format!(
            "Unsupported index type {:?}, expected IndexFlatL2",
            String::from_utf8_lossy(fourcc)
        )));
    }

    let dimension = reader.i32()?;
    let count = reader.i64()?;
    reader.i64()?;
    reader.i64()?;
    reader.take(1)?;
    let metric = reader.i32()?;
    if metric > 1 {
        reader.take(4)?;
    }
    if metric != METRIC_L2 {
        return Err(corrupt(format!("Index metric {} is not L2", metric)));
    }
    if dimension <= 0 || count < 0 {
        return Err(corrupt(format!("Invalid header: d={} ntotal={}", dimension, count)));
    }

    let dimension = dimension as usize;
    let count = count as usize;
    let floats = reader.u64()? as usize;
    if Some(floats) != dimension.checked_mul(count) {
        return Err(corrupt(format!(
            "Payload holds {} floats, header promises {} x {}",
            floats, count, dimension
        )));
    }

    let payload = reader.take(floats.saturating_mul(4))?;
    let vectors = payload
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();

    if reader.offset != bytes.len() {
        return Err(corrupt(format!(
            "{} trailing bytes after index payload",
            bytes.len() - reader.offset
        )));
    }

    Ok((dimension, count, vectors))
}

fn encode_flat_l2(dimension: usize, vectors: &[f32]) -> Vec<u8> {
    let count = if dimension == 0 { 0 } else { vectors.len() / dimension };
    let mut out = Vec::with_capacity(45 + vectors.len() * 4);

    out.extend_from_slice(FOURCC_FLAT_L2);
    out.extend_from_slice(&(dimension as i32).to_le_bytes());
    out.extend_from_slice(&(count as i64).to_le_bytes());
    out.extend_from_slice(&HEADER_DUMMY.to_le_bytes());
    out.extend_from_slice(&HEADER_DUMMY.to_le_bytes());
    out.push(1);
    out.extend_from_slice(&METRIC_L2.to_le_bytes());
    out.extend_from_slice(&(vectors.len() as u64).to_le_bytes());
    out.extend(vectors.iter().flat_map(|f| f.to_le_bytes()));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paper(id: &str, title: &str) -> DocumentRecord {
        DocumentRecord::new(id, title, vec!["Ada Lovelace".into()], "2020", "", Source::Local)
    }

    fn sample_index() -> VectorIndex {
        VectorIndex::from_parts(
            2,
            vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![5.0, 5.0]],
            vec![paper("a", "Origin"), paper("b", "East"), paper("c", "North"), paper("d", "Far")],
        )
        .unwrap()
    }

    #[test]
    fn test_nearest_first_with_insertion_order_ties() {
        let index = sample_index();

        let scored = index.search_scored(&[0.0, 0.0], 3).unwrap();
        assert_eq!(scored, vec![(0, 0.0), (1, 1.0), (2, 1.0)]);

        let ids: Vec<_> = index.search(&[0.9, 0.1], 2).unwrap().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_k_bound_and_determinism() {
        let index = sample_index();
        for k in [0, 1, 4, 10] {
            let first = index.search(&[2.0, 2.0], k).unwrap();
            assert!(first.len() <= k.min(index.len()));
            assert_eq!(first, index.search(&[2.0, 2.0], k).unwrap());
        }
    }

    #[test]
    fn test_empty_index_returns_nothing() {
        let index = VectorIndex::new(3);
        assert!(index.search(&[0.0, 0.0, 0.0], 5).unwrap().is_empty());
    }

    #[test]
    fn test_query_dimension_checked() {
        let err = sample_index().search(&[1.0, 2.0, 3.0], 1).unwrap_err();
        assert!(matches!(err, AppError::DimensionMismatch { expected: 2, actual: 3 }));
    }

    #[test]
    fn test_save_and_open_preserve_search() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("library.index");
        let meta_path = dir.path().join("library_meta.json");

        let index = sample_index();
        index.save(&index_path, &meta_path).unwrap();

        let reopened = VectorIndex::open(&index_path, &meta_path).unwrap();
        assert_eq!(reopened.len(), 4);
        assert_eq!(reopened.dimension(), 2);
        assert_eq!(
            reopened.search(&[4.0, 4.0], 2).unwrap(),
            index.search(&[4.0, 4.0], 2).unwrap()
        );
    }

    #[test]
    fn test_length_mismatch_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("library.index");
        let meta_path = dir.path().join("library_meta.json");
        sample_index().save(&index_path, &meta_path).unwrap();

        std::fs::write(&meta_path, r#"[{"title": "Only one"}]"#).unwrap();

        let err = VectorIndex::open(&index_path, &meta_path).unwrap_err();
        assert!(matches!(err, AppError::IndexCorrupt { .. }));
    }

    #[test]
    fn test_unreadable_index_is_corruption() {
        let dir = tempfile::tempdir().unwrap();
        let index_path = dir.path().join("library.index");
        let meta_path = dir.path().join("library_meta.json");
        std::fs::write(&meta_path, "[]").unwrap();

        let missing = VectorIndex::open(&index_path, &meta_path).unwrap_err();
        assert!(matches!(missing, AppError::IndexCorrupt { .. }));

        let mut bytes = encode_flat_l2(2, &[1.0, 2.0, 3.0, 4.0]);
        bytes.truncate(bytes.len() - 3);
        std::fs::write(&index_path, bytes).unwrap();
        let truncated = VectorIndex::open(&index_path, &meta_path).unwrap_err();
        assert!(matches!(truncated, AppError::IndexCorrupt { .. }));

        std::fs::write(&index_path, b"IwFl garbage").unwrap();
        let wrong_type = VectorIndex::open(&index_path, &meta_path).unwrap_err();
        assert!(matches!(wrong_type, AppError::IndexCorrupt { .. }));
    }

    #[test]
    fn test_flexible_metadata_fields() {
        let entries: Vec<MetadataEntry> = serde_json::from_str(
            r#"[
                {"id": "smith2020", "title": "Calcium and lipids", "authors": ["Smith, J", "Doe, A"], "year": "2020"},
                {"title": "", "authors": "Roe, R; Poe, E", "year": 2019, "abstract": "Text."},
                {}
            ]"#,
        )
        .unwrap();

        let records: Vec<_> = entries.into_iter().enumerate().map(|(i, e)| e.into_record(i)).collect();
        assert_eq!(records[0].id, "smith2020");
        assert_eq!(records[0].authors, vec!["Smith, J", "Doe, A"]);
        assert_eq!(records[1].title, paperscout_common::models::NO_TITLE);
        assert_eq!(records[1].year, "2019");
        assert_eq!(records[1].authors, vec!["Roe, R", "Poe, E"]);
        assert_eq!(records[2].id, "2");
        assert_eq!(records[2].year, paperscout_common::models::NO_YEAR);
        assert_eq!(records[2].source, Source::Local);
    }

    #[test]
    fn test_contains_title_uses_dedup_key() {
        let index = sample_index();
        assert!(index.contains_title("  ORIGIN. "));
        assert!(!index.contains_title("Origin story"));
    }
}
