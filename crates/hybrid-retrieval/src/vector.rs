//! Vector similarity index
//!
//! A flat cosine-similarity index over document embeddings. Embeddings come
//! from an `Embedder`; `HashingEmbedder` needs no model server and is the
//! default.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RetrievalError};

/// Turns text into a fixed-length vector
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn dimension(&self) -> usize;
}

/// Feature-hashing embedder over character bigrams and whitespace tokens
///
/// Deterministic and dependency-free; similar wording yields similar
/// vectors, which is enough for ranking structured candidates.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub const DEFAULT_DIMENSION: usize = 256;

    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(Self::DEFAULT_DIMENSION)
    }
}

impl Embedder for HashingEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vector = vec![0.0f32; self.dimension];
        let normalized = text.to_lowercase();

        for token in normalized.split_whitespace() {
            let slot = (fnv1a(token.as_bytes()) % self.dimension as u64) as usize;
            vector[slot] += 1.0;

            let chars: Vec<char> = token.chars().collect();
            for pair in chars.windows(2) {
                let bigram: String = pair.iter().collect();
                let slot = (fnv1a(bigram.as_bytes()) % self.dimension as u64) as usize;
                vector[slot] += 0.5;
            }
        }

        let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm == 0.0 {
            return Err(RetrievalError::embedding("text has no tokens"));
        }
        for v in &mut vector {
            *v /= norm;
        }
        Ok(vector)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// Cosine similarity; zero when either vector has no magnitude
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

/// Flat in-memory index keyed by document id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    dimension: usize,
    entries: BTreeMap<String, Vec<f32>>,
}

impl VectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension,
            entries: BTreeMap::new(),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn upsert(&mut self, doc_id: impl Into<String>, vector: Vec<f32>) -> Result<()> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        self.entries.insert(doc_id.into(), vector);
        Ok(())
    }

    pub fn remove(&mut self, doc_id: &str) -> bool {
        self.entries.remove(doc_id).is_some()
    }

    /// Top `k` ids by similarity, optionally restricted to `allowed`
    pub fn search(&self, query: &[f32], k: usize, allowed: Option<&HashSet<String>>) -> Result<Vec<(String, f32)>> {
        if query.len() != self.dimension {
            return Err(RetrievalError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        let mut scored: Vec<(String, f32)> = self
            .entries
            .iter()
            .filter(|(id, _)| allowed.map_or(true, |set| set.contains(*id)))
            .map(|(id, vector)| (id.clone(), cosine_similarity(query, vector)))
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(k);
        Ok(scored)
    }

    /// Write a JSON snapshot
    ///
    /// The directory will be created if it doesn't exist.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, content).await?;
        log::debug!("Saved vector index ({} entries) to {:?}", self.entries.len(), path);
        Ok(())
    }

    /// Read a snapshot written by `save`
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await?;
        let index: Self = serde_json::from_str(&content)?;
        if let Some((id, vector)) = index.entries.iter().find(|(_, v)| v.len() != index.dimension) {
            log::warn!("Vector index {:?}: entry '{}' has the wrong dimension", path, id);
            return Err(RetrievalError::DimensionMismatch {
                expected: index.dimension,
                actual: vector.len(),
            });
        }
        log::info!("Loaded vector index ({} entries) from {:?}", index.entries.len(), path);
        Ok(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_hashing_embedder_is_deterministic_and_normalized() {
        let embedder = HashingEmbedder::new(64);
        let a = embedder.embed("전세 보증금 반환").unwrap();
        let b = embedder.embed("전세 보증금 반환").unwrap();
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
        assert!(embedder.embed("   ").is_err());
    }

    #[test]
    fn test_similar_text_ranks_first() {
        let embedder = HashingEmbedder::default();
        let mut index = VectorIndex::new(embedder.dimension());
        index.upsert("deposit", embedder.embed("임대차 보증금 반환 청구").unwrap()).unwrap();
        index.upsert("tax", embedder.embed("양도소득세 비과세 요건").unwrap()).unwrap();

        let query = embedder.embed("보증금 반환").unwrap();
        let hits = index.search(&query, 2, None).unwrap();
        assert_eq!(hits[0].0, "deposit");
        assert!(hits[0].1 > hits[1].1);

        let allowed = HashSet::from(["tax".to_string()]);
        let hits = index.search(&query, 2, Some(&allowed)).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "tax");
    }

    #[test]
    fn test_dimension_is_enforced() {
        let mut index = VectorIndex::new(4);
        let err = index.upsert("x", vec![1.0, 0.0]).unwrap_err();
        assert!(matches!(err, RetrievalError::DimensionMismatch { expected: 4, actual: 2 }));
        assert!(index.search(&[1.0], 1, None).is_err());
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("index").join("vectors.json");
        let mut index = VectorIndex::new(2);
        index.upsert("a", vec![1.0, 0.0]).unwrap();
        index.save(&path).await.unwrap();

        let loaded = VectorIndex::load(&path).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded.search(&[1.0, 0.0], 1, None).unwrap()[0].0, "a");
    }
}
