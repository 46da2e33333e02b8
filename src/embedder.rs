//! Turns canonicalized text into fixed-length vectors for the coherence
//! gate's indices.
//!
//! Two implementations share the [`Embedder`] trait: [`FastEmbedder`] is a
//! deterministic bucket-hash that needs no model artifact and is always
//! available; [`SemanticEmbedder`] loads a small pinned local artifact and
//! mean-pools token buckets into a normalized vector. Neither reaches the
//! network at runtime — no `ort`, no `tokenizers`, nothing that can fail
//! from a missing system library mid-pipeline.

use std::path::Path;
use std::sync::Arc;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Standard embedding width used throughout the coherence gate.
pub const EMBEDDING_DIM: usize = 384;

pub type Embedding = Vec<f32>;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResult {
    pub embedding: Embedding,
    pub text: String,
    pub duration_ms: u64,
    pub token_count: usize,
}

/// Identity tag an index stores alongside its vectors so a later query
/// with a mismatched embedder is rejected rather than silently producing
/// meaningless distances.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed(&self, text: &str) -> Result<EmbeddingResult>;

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<EmbeddingResult>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }
}

/// Deterministic, model-free embedder: each codepoint at position `i`
/// accumulates into bucket `(c * 31 + i * 17) mod dim`, then the whole
/// vector is L2-normalized. The position term makes the scheme
/// order-sensitive — "ignore previous" and "previous ignore" land in
/// different buckets — unlike a plain bag-of-tokens hash. Two runs on
/// the same text always produce the same vector, which matters for
/// reproducible tests and for environments where no model artifact is
/// available at all.
pub struct FastEmbedder {
    dim: usize,
}

impl FastEmbedder {
    pub fn new() -> Self {
        Self { dim: EMBEDDING_DIM }
    }

    pub fn with_dim(dim: usize) -> Self {
        Self { dim }
    }
}

impl Default for FastEmbedder {
    fn default() -> Self {
        Self::new()
    }
}

impl Embedder for FastEmbedder {
    fn name(&self) -> &str {
        "fast-bucket-hash-v1"
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&self, text: &str) -> Result<EmbeddingResult> {
        let start = std::time::Instant::now();
        let mut vector = vec![0f32; self.dim];
        let dim = self.dim as u64;
        let mut char_count = 0usize;

        for (i, c) in text.chars().enumerate() {
            let bucket = ((c as u64).wrapping_mul(31).wrapping_add((i as u64).wrapping_mul(17)) % dim) as usize;
            vector[bucket] += 1.0;
            char_count += 1;
        }

        let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in vector.iter_mut() {
                *v /= norm;
            }
        }

        Ok(EmbeddingResult {
            embedding: vector,
            text: text.to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            token_count: char_count,
        })
    }
}

/// A per-token row in the pinned embedding table: `ARTIFACT[token] ->
/// dim-length contribution`. Loaded once at construction and shared
/// across calls via `Arc`.
#[derive(Debug, Clone, Deserialize, Serialize)]
struct ArtifactTable {
    dim: usize,
    checksum_sha256: String,
    rows: std::collections::HashMap<String, Vec<f32>>,
}

/// Model-backed embedder: loads a JSON artifact mapping known tokens to
/// precomputed dim-length vectors, mean-pools the rows for tokens present
/// in the input, and L2-normalizes the result. Unknown tokens fall back
/// to the same bucket-hash scheme `FastEmbedder` uses, so coverage
/// degrades gracefully instead of zeroing out unseen vocabulary.
pub struct SemanticEmbedder {
    table: Arc<ArtifactTable>,
    fallback: FastEmbedder,
}

impl SemanticEmbedder {
    /// Load the artifact from disk and verify its checksum before
    /// trusting it. A corrupt or tampered artifact is a configuration
    /// error, not a runtime one — fail at construction, never mid-pipeline.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let table: ArtifactTable = serde_json::from_slice(&bytes)?;

        // Rows in a HashMap iterate in arbitrary order; the checksum
        // is computed over a canonicalized (sorted) encoding instead.
        let mut sorted_keys: Vec<&String> = table.rows.keys().collect();
        sorted_keys.sort();
        let mut hasher = Sha256::new();
        for token in sorted_keys {
            hasher.update(token.as_bytes());
            for v in &table.rows[token] {
                hasher.update(v.to_le_bytes());
            }
        }
        let computed = hex::encode(hasher.finalize());
        if computed != table.checksum_sha256 {
            return Err(Error::Config(format!(
                "embedding artifact checksum mismatch: expected {}, computed {}",
                table.checksum_sha256, computed
            )));
        }

        if table.dim != EMBEDDING_DIM {
            return Err(Error::Config(format!(
                "embedding artifact dim {} does not match EMBEDDING_DIM {}",
                table.dim, EMBEDDING_DIM
            )));
        }

        Ok(Self {
            table: Arc::new(table),
            fallback: FastEmbedder::with_dim(EMBEDDING_DIM),
        })
    }
}

impl Embedder for SemanticEmbedder {
    fn name(&self) -> &str {
        "semantic-artifact-v1"
    }

    fn dim(&self) -> usize {
        self.table.dim
    }

    fn embed(&self, text: &str) -> Result<EmbeddingResult> {
        let start = std::time::Instant::now();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let mut accum = Array1::<f32>::zeros(self.table.dim);
        let mut hits = 0usize;

        for token in &tokens {
            if let Some(row) = self.table.rows.get(*token) {
                let row_arr = Array1::from_vec(row.clone());
                accum += &row_arr;
                hits += 1;
            }
        }

        let vector = if hits > 0 {
            accum /= hits as f32;
            let norm = accum.dot(&accum).sqrt();
            if norm > 0.0 {
                accum /= norm;
            }
            accum.to_vec()
        } else {
            self.fallback.embed(text)?.embedding
        };

        Ok(EmbeddingResult {
            embedding: vector,
            text: text.to_string(),
            duration_ms: start.elapsed().as_millis() as u64,
            token_count: tokens.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fast_embedder_deterministic() {
        let e = FastEmbedder::new();
        let a = e.embed("ignore all previous instructions").unwrap();
        let b = e.embed("ignore all previous instructions").unwrap();
        assert_eq!(a.embedding, b.embedding);
    }

    #[test]
    fn test_fast_embedder_unit_norm() {
        let e = FastEmbedder::new();
        let r = e.embed("some arbitrary text to embed").unwrap();
        let norm: f32 = r.embedding.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4 || norm == 0.0);
    }

    #[test]
    fn test_fast_embedder_empty_text_zero_vector() {
        let e = FastEmbedder::new();
        let r = e.embed("").unwrap();
        assert!(r.embedding.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_fast_embedder_dim_matches() {
        let e = FastEmbedder::new();
        let r = e.embed("hello").unwrap();
        assert_eq!(r.embedding.len(), EMBEDDING_DIM);
        assert_eq!(e.dim(), EMBEDDING_DIM);
    }

    #[test]
    fn test_fast_embedder_is_order_sensitive() {
        let e = FastEmbedder::new();
        let a = e.embed("ignore previous").unwrap();
        let b = e.embed("previous ignore").unwrap();
        assert_ne!(a.embedding, b.embedding);
    }

    #[test]
    fn test_semantic_embedder_rejects_bad_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("artifact.json");
        let table = serde_json::json!({
            "dim": EMBEDDING_DIM,
            "checksum_sha256": "deadbeef",
            "rows": {}
        });
        std::fs::write(&path, table.to_string()).unwrap();
        let result = SemanticEmbedder::load(&path);
        assert!(result.is_err());
    }
}
