use super::similarity;
use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// One indexed historical case: `text` is what was embedded, `label` is
/// what retrieval shows the reader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexDoc {
    pub id: String,
    pub text: String,
    pub label: String,
}

pub trait VectorIndex: Send + Sync {
    /// Top-k nearest neighbors by similarity; ties keep insertion order.
    fn query(&self, embedding: &[f32], k: usize) -> Vec<(IndexDoc, f64)>;

    fn upsert(&mut self, doc: IndexDoc, embedding: Vec<f32>);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexEntry {
    doc: IndexDoc,
    embedding: Vec<f32>,
}

/// In-memory index with JSON persistence, scanned linearly; fine for the
/// corpus sizes a case store produces.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct MemoryIndex {
    entries: Vec<IndexEntry>,
}

impl MemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = fs::read_to_string(path).map_err(|e| StoreError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

impl VectorIndex for MemoryIndex {
    fn query(&self, embedding: &[f32], k: usize) -> Vec<(IndexDoc, f64)> {
        let mut scored: Vec<(usize, f64)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(i, e)| (i, similarity(embedding, &e.embedding)))
            .collect();

        // Stable sort keeps insertion order on ties
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        scored
            .into_iter()
            .take(k)
            .map(|(i, sim)| (self.entries[i].doc.clone(), sim))
            .collect()
    }

    fn upsert(&mut self, doc: IndexDoc, embedding: Vec<f32>) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.doc.id == doc.id) {
            existing.doc = doc;
            existing.embedding = embedding;
        } else {
            self.entries.push(IndexEntry { doc, embedding });
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::{Embedder, HashedEmbedder};

    fn doc(id: &str, text: &str) -> IndexDoc {
        IndexDoc {
            id: id.to_string(),
            text: text.to_string(),
            label: text.to_string(),
        }
    }

    #[test]
    fn test_query_ranks_by_similarity() {
        let embedder = HashedEmbedder::default();
        let mut index = MemoryIndex::new();
        index.upsert(
            doc("a", "2019 Toyota Camry sedan"),
            embedder.embed("2019 Toyota Camry sedan"),
        );
        index.upsert(
            doc("b", "2005 Ford F-150 pickup"),
            embedder.embed("2005 Ford F-150 pickup"),
        );

        let query = embedder.embed("2020 Toyota Camry sedan");
        let hits = index.query(&query, 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.id, "a");
        assert!(hits[0].1 >= hits[1].1);
    }

    #[test]
    fn test_exact_match_tops_with_similarity_one() {
        let embedder = HashedEmbedder::default();
        let mut index = MemoryIndex::new();
        index.upsert(
            doc("a", "2020 Toyota Camry 35000 miles"),
            embedder.embed("2020 Toyota Camry 35000 miles"),
        );

        let query = embedder.embed("2020 Toyota Camry 35000 miles");
        let hits = index.query(&query, 1);
        assert!((hits[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ties_keep_insertion_order() {
        let embedder = HashedEmbedder::default();
        let mut index = MemoryIndex::new();
        // Same text -> same embedding -> tied similarity
        index.upsert(doc("first", "same text"), embedder.embed("same text"));
        index.upsert(doc("second", "same text"), embedder.embed("same text"));

        let hits = index.query(&embedder.embed("same text"), 2);
        assert_eq!(hits[0].0.id, "first");
        assert_eq!(hits[1].0.id, "second");
    }

    #[test]
    fn test_upsert_replaces_by_id() {
        let embedder = HashedEmbedder::default();
        let mut index = MemoryIndex::new();
        index.upsert(doc("a", "old text"), embedder.embed("old text"));
        index.upsert(doc("a", "new text"), embedder.embed("new text"));
        assert_eq!(index.len(), 1);
        let hits = index.query(&embedder.embed("new text"), 1);
        assert_eq!(hits[0].0.text, "new text");
    }

    #[test]
    fn test_roundtrip_persistence() {
        let embedder = HashedEmbedder::default();
        let mut index = MemoryIndex::new();
        index.upsert(doc("a", "some case"), embedder.embed("some case"));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        index.save(&path).unwrap();

        let reloaded = MemoryIndex::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let index = MemoryIndex::load(Path::new("/nonexistent/index.json")).unwrap();
        assert!(index.is_empty());
    }
}
