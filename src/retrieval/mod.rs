mod fusion;
mod index;

pub use fusion::RetrievalFusion;
pub use index::{IndexDoc, MemoryIndex, VectorIndex};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A retrieved historical case with its similarity to the query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Neighbor {
    pub label: String,
    /// 1 − cosine_distance, in [0,1], higher is more similar.
    pub similarity: f64,
}

/// Early-stage retrieval output: descriptive context only, no generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalBrief {
    pub neighbors: Vec<Neighbor>,
    pub brief: String,
}

/// Late-stage retrieval output: enriched re-query plus optional synthesis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LateRetrieval {
    pub neighbors: Vec<Neighbor>,
    pub query: String,
    /// `None` means "synthesis unavailable", not an error.
    pub synthesis: Option<String>,
}

pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Vec<f32>;

    fn dimension(&self) -> usize;
}

/// Deterministic feature-hashing embedder: each token is hashed into a
/// signed bucket, the result L2-normalized. Identical text always maps to
/// the identical vector.
pub struct HashedEmbedder {
    dimension: usize,
}

impl HashedEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }
}

impl Default for HashedEmbedder {
    fn default() -> Self {
        Self::new(64)
    }
}

impl Embedder for HashedEmbedder {
    fn embed(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in text.to_lowercase().split_whitespace() {
            let hash = Sha256::digest(token.as_bytes());
            let bucket = u32::from_be_bytes([hash[0], hash[1], hash[2], hash[3]]) as usize
                % self.dimension;
            let sign = if hash[4] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut vector {
                *v /= norm;
            }
        }
        vector
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Similarity as `1 − cosine_distance`, clamped to [0,1].
pub fn similarity(a: &[f32], b: &[f32]) -> f64 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let cosine = (dot / (norm_a * norm_b)) as f64;
    cosine.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical_embeddings_similarity_one() {
        let embedder = HashedEmbedder::default();
        let a = embedder.embed("2020 Toyota Camry 35000 miles");
        let b = embedder.embed("2020 Toyota Camry 35000 miles");
        assert_eq!(a, b);
        assert!((similarity(&a, &b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_similarity_monotonic_with_overlap() {
        let embedder = HashedEmbedder::default();
        let query = embedder.embed("2020 Toyota Camry sedan");
        let close = embedder.embed("2019 Toyota Camry sedan");
        let far = embedder.embed("1998 Ford F-150 pickup truck");
        assert!(similarity(&query, &close) > similarity(&query, &far));
    }

    #[test]
    fn test_similarity_bounds() {
        let embedder = HashedEmbedder::default();
        let a = embedder.embed("alpha beta gamma");
        let b = embedder.embed("delta epsilon zeta");
        let sim = similarity(&a, &b);
        assert!((0.0..=1.0).contains(&sim));
    }

    #[test]
    fn test_zero_vector_similarity_zero() {
        let zeros = vec![0.0f32; 8];
        let other = vec![1.0f32; 8];
        assert_eq!(similarity(&zeros, &other), 0.0);
    }
}
