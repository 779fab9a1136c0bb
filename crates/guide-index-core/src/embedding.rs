//! Encoder trait and vector utilities.
//!
//! Defines the [`Encoder`] trait that every embedding backend implements,
//! plus pure helpers for normalization, inner-product scoring and f32 blob
//! serialization.
//!
//! Concrete encoders (fastembed, tract) live in the `guide-index` app crate.

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::path::PathBuf;

/// An embedding strategy bound to one model.
///
/// Text-only encoders map strings to vectors. Joint encoders additionally map
/// images into the same space, so a text query can be scored against image
/// descriptors. Outputs must be deterministic for a given input; callers
/// normalize them with [`l2_normalize`] before storage or query.
#[async_trait]
pub trait Encoder: Send + Sync {
    /// Model identifier (e.g. `"all-minilm-l6-v2"`).
    fn model_name(&self) -> &str;

    /// Output dimensionality.
    fn dims(&self) -> usize;

    /// Whether [`encode_images`](Encoder::encode_images) is supported.
    fn supports_images(&self) -> bool {
        false
    }

    /// Embed a batch of texts, one vector per input, in input order.
    async fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a batch of image files, one vector per input, in input order.
    async fn encode_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
        let _ = paths;
        bail!("Encoder '{}' does not support images", self.model_name())
    }
}

/// Euclidean norm of a vector.
pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Scale a vector to unit length.
///
/// A zero vector has no direction and is returned unchanged.
pub fn l2_normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm = l2_norm(&v);
    if norm > f32::EPSILON {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Inner product of two vectors; the `IP` metric's similarity score.
///
/// For unit vectors this equals cosine similarity. Returns `0.0` for empty
/// vectors or vectors of different lengths.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Encode a float vector as little-endian f32 bytes.
///
/// This is both the SQLite BLOB format and the descriptor blob format the
/// vector service expects.
///
/// # Example
///
/// ```rust
/// use guide_index_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode little-endian f32 bytes back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}
