//! In-memory [`DescriptorStore`] implementation for tests.
//!
//! Sets live in a `HashMap` behind `std::sync::RwLock`. Queries are a
//! brute-force inner-product scan over the set, like the `Flat` engine.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::inner_product;
use crate::models::{DescriptorMetadata, Hit, SetInfo, SetSpec, ENGINE_FLAT, METRIC_IP};

use super::{check_compatible, rank_hits, DescriptorStore, StoreError};

struct StoredSet {
    dimensions: usize,
    descriptors: Vec<(Vec<f32>, DescriptorMetadata)>,
}

/// In-memory store for tests.
pub struct InMemoryStore {
    sets: RwLock<HashMap<String, StoredSet>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            sets: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl DescriptorStore for InMemoryStore {
    fn backend_name(&self) -> &str {
        "memory"
    }

    async fn create_set(&self, spec: &SetSpec) -> Result<()> {
        if let Some(existing) = self.describe_set(&spec.name).await? {
            check_compatible(&existing, spec)?;
            return Ok(());
        }
        let mut sets = self.sets.write().map_err(poisoned)?;
        sets.insert(
            spec.name.clone(),
            StoredSet {
                dimensions: spec.dimensions,
                descriptors: Vec::new(),
            },
        );
        Ok(())
    }

    async fn describe_set(&self, name: &str) -> Result<Option<SetInfo>> {
        let sets = self.sets.read().map_err(poisoned)?;
        Ok(sets.get(name).map(|s| SetInfo {
            name: name.to_string(),
            dimensions: s.dimensions,
            engine: ENGINE_FLAT.to_string(),
            metric: METRIC_IP.to_string(),
            count: Some(s.descriptors.len() as u64),
        }))
    }

    async fn add(
        &self,
        set: &str,
        embedding: &[f32],
        metadata: &DescriptorMetadata,
    ) -> Result<()> {
        let mut sets = self.sets.write().map_err(poisoned)?;
        let stored = sets
            .get_mut(set)
            .ok_or_else(|| StoreError::SetNotFound(set.to_string()))?;
        if embedding.len() != stored.dimensions {
            return Err(StoreError::DimensionMismatch {
                set: set.to_string(),
                expected: stored.dimensions,
                actual: embedding.len(),
            }
            .into());
        }
        stored
            .descriptors
            .push((embedding.to_vec(), metadata.clone()));
        Ok(())
    }

    async fn query(&self, set: &str, embedding: &[f32], k: usize) -> Result<Vec<Hit>> {
        let sets = self.sets.read().map_err(poisoned)?;
        let stored = match sets.get(set) {
            Some(s) => s,
            None => return Ok(Vec::new()),
        };
        if embedding.len() != stored.dimensions {
            return Err(StoreError::DimensionMismatch {
                set: set.to_string(),
                expected: stored.dimensions,
                actual: embedding.len(),
            }
            .into());
        }

        let hits = stored
            .descriptors
            .iter()
            .map(|(vector, metadata)| Hit {
                score: inner_product(embedding, vector),
                metadata: metadata.clone(),
            })
            .collect();

        Ok(rank_hits(hits, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(dims: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dims];
        v[hot] = 1.0;
        v
    }

    #[tokio::test]
    async fn create_set_is_idempotent() {
        let store = InMemoryStore::new();
        let spec = SetSpec::new("guides", 384);
        store.create_set(&spec).await.unwrap();
        store.create_set(&spec).await.unwrap();

        let info = store.describe_set("guides").await.unwrap().unwrap();
        assert_eq!(info.dimensions, 384);
        assert_eq!(info.metric, "IP");
        assert_eq!(info.engine, "Flat");
    }

    #[tokio::test]
    async fn create_set_conflicting_dimensions_fails() {
        let store = InMemoryStore::new();
        store.create_set(&SetSpec::new("guides", 384)).await.unwrap();
        let err = store
            .create_set(&SetSpec::new("guides", 1024))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::SetConflict { .. })
        ));
    }

    #[tokio::test]
    async fn add_wrong_dimensions_fails() {
        let store = InMemoryStore::new();
        store.create_set(&SetSpec::new("guides", 384)).await.unwrap();
        let err = store
            .add(
                "guides",
                &unit(1024, 0),
                &DescriptorMetadata::text("doc", "Some heading"),
            )
            .await
            .unwrap_err();
        match err.downcast_ref::<StoreError>() {
            Some(StoreError::DimensionMismatch {
                expected, actual, ..
            }) => {
                assert_eq!(*expected, 384);
                assert_eq!(*actual, 1024);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn add_to_missing_set_fails() {
        let store = InMemoryStore::new();
        let err = store
            .add("nope", &unit(4, 0), &DescriptorMetadata::image("doc", 0))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::SetNotFound(_))
        ));
    }

    #[tokio::test]
    async fn query_missing_set_is_empty() {
        let store = InMemoryStore::new();
        let hits = store.query("nope", &unit(4, 0), 3).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn query_orders_by_descending_inner_product() {
        let store = InMemoryStore::new();
        store.create_set(&SetSpec::new("s", 2)).await.unwrap();
        let far = vec![-1.0, 0.0];
        let near = vec![0.8, 0.6];
        let exact = vec![1.0, 0.0];
        store
            .add("s", &far, &DescriptorMetadata::text("d", "far away"))
            .await
            .unwrap();
        store
            .add("s", &near, &DescriptorMetadata::text("d", "close by"))
            .await
            .unwrap();
        store
            .add("s", &exact, &DescriptorMetadata::text("d", "exact match"))
            .await
            .unwrap();

        let hits = store.query("s", &[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].metadata, DescriptorMetadata::text("d", "exact match"));
        assert!((hits[0].score - 1.0).abs() < 1e-6);
        assert_eq!(hits[1].metadata, DescriptorMetadata::text("d", "close by"));
        assert!(hits[0].score > hits[1].score);

        let info = store.describe_set("s").await.unwrap().unwrap();
        assert_eq!(info.count, Some(3));
    }
}
