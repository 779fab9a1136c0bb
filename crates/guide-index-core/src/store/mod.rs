//! Descriptor store abstraction.
//!
//! The [`DescriptorStore`] trait is the thin façade the pipeline uses to
//! persist and look up descriptors. Backends: the remote vector service and
//! the local SQLite file (both in the app crate) and [`memory::InMemoryStore`]
//! for tests.
//!
//! Stores are append-only: no update or delete is exposed.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;

use crate::models::{DescriptorMetadata, Hit, SetInfo, SetSpec};

/// Store failures callers may need to tell apart.
///
/// Backends return these wrapped in `anyhow::Error`; use
/// `err.downcast_ref::<StoreError>()` to inspect.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("descriptor set not found: {0}")]
    SetNotFound(String),

    #[error("descriptor set '{name}' already exists with {existing}, requested {requested}")]
    SetConflict {
        name: String,
        existing: String,
        requested: String,
    },

    #[error("descriptor set '{set}' expects {expected} dimensions, got {actual}")]
    DimensionMismatch {
        set: String,
        expected: usize,
        actual: usize,
    },

    #[error("invalid descriptor metadata: {0}")]
    InvalidMetadata(String),

    #[error("vector service error: {0}")]
    Service(String),
}

/// Persistence and k-NN retrieval over named descriptor sets.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`create_set`](DescriptorStore::create_set) | Create a set (idempotent) |
/// | [`describe_set`](DescriptorStore::describe_set) | Look up a set's schema |
/// | [`add`](DescriptorStore::add) | Append one descriptor |
/// | [`query`](DescriptorStore::query) | k nearest descriptors by inner product |
#[async_trait]
pub trait DescriptorStore: Send + Sync {
    /// Short backend identifier for logs and status output.
    fn backend_name(&self) -> &str;

    /// Create a set with the `Flat` engine and `IP` metric.
    ///
    /// Succeeds without change when a set with the same name and
    /// dimensions exists. Fails with [`StoreError::SetConflict`] when the
    /// existing set has other dimensions or another metric.
    async fn create_set(&self, spec: &SetSpec) -> Result<()>;

    /// Schema of an existing set, or `None`.
    async fn describe_set(&self, name: &str) -> Result<Option<SetInfo>>;

    /// Append one descriptor.
    ///
    /// Fails with [`StoreError::SetNotFound`] for a missing set and
    /// [`StoreError::DimensionMismatch`] when `embedding.len()` differs from
    /// the set's dimensions.
    async fn add(&self, set: &str, embedding: &[f32], metadata: &DescriptorMetadata)
        -> Result<()>;

    /// Up to `k` hits ordered by descending score.
    ///
    /// A missing set yields an empty list. A query of the wrong
    /// dimensionality fails with [`StoreError::DimensionMismatch`].
    async fn query(&self, set: &str, embedding: &[f32], k: usize) -> Result<Vec<Hit>>;
}

/// Check that a set's metric and dimensions agree with a requested spec.
pub fn check_compatible(existing: &SetInfo, spec: &SetSpec) -> Result<(), StoreError> {
    if existing.dimensions != spec.dimensions || existing.metric != crate::models::METRIC_IP {
        return Err(StoreError::SetConflict {
            name: spec.name.clone(),
            existing: format!("{} dims/{}", existing.dimensions, existing.metric),
            requested: format!("{} dims/{}", spec.dimensions, crate::models::METRIC_IP),
        });
    }
    Ok(())
}

/// Order hits by descending score and keep the top `k`.
pub fn rank_hits(mut hits: Vec<Hit>, k: usize) -> Vec<Hit> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    hits.truncate(k);
    hits
}
