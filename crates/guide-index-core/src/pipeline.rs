//! Generic ingest/retrieve pipeline.
//!
//! A [`Pipeline`] binds a descriptor set, an [`Encoder`] and a `k`. The
//! text-only and multimodal configurations are both instances of it; they
//! differ only in the encoder (and therefore the set's dimensionality) and
//! in `k`.
//!
//! Every vector passes through [`l2_normalize`] here before it reaches the
//! store, on both the ingest and the query side. An encoder output with no
//! direction (zero or non-finite norm) is an error.
//!
//! # Score convention
//!
//! Sets use the inner-product metric. A hit's score is the inner product of
//! two unit vectors, so higher means more similar, and [`select_best`] keeps
//! the maximum.

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::embedding::{l2_norm, l2_normalize, Encoder};
use crate::models::{BestMatch, DescriptorMetadata, Hit, SetSpec};
use crate::store::DescriptorStore;

/// Segments extracted from one document, ready to embed.
#[derive(Debug, Clone, Default)]
pub struct DocumentSegments {
    /// Document name (PDF file stem).
    pub name: String,
    /// Cleaned headings, in document order.
    pub headings: Vec<String>,
    /// Image files that survived the image policy; position = `image_index`.
    pub images: Vec<PathBuf>,
}

/// Counts of descriptors written for one document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub headings: usize,
    pub images: usize,
}

/// One (descriptor set, encoder, k) configuration.
pub struct Pipeline {
    pub name: String,
    pub set: SetSpec,
    pub encoder: Arc<dyn Encoder>,
    pub k: usize,
}

impl Pipeline {
    /// Build a pipeline whose set dimensionality follows the encoder.
    pub fn new(name: &str, set_name: &str, encoder: Arc<dyn Encoder>, k: usize) -> Self {
        let set = SetSpec::new(set_name, encoder.dims());
        Self {
            name: name.to_string(),
            set,
            encoder,
            k,
        }
    }

    /// Create the pipeline's descriptor set if it does not exist.
    pub async fn ensure_set(&self, store: &dyn DescriptorStore) -> Result<()> {
        store.create_set(&self.set).await
    }

    /// Embed a document's headings and images and append them to the set.
    ///
    /// Headings are written first, then images. Any failure aborts the
    /// document; descriptors already written stay in the set.
    pub async fn ingest(
        &self,
        store: &dyn DescriptorStore,
        doc: &DocumentSegments,
    ) -> Result<IngestStats> {
        if !doc.images.is_empty() && !self.encoder.supports_images() {
            bail!(
                "Pipeline '{}' uses text-only encoder '{}' but {} images were supplied for '{}'",
                self.name,
                self.encoder.model_name(),
                doc.images.len(),
                doc.name
            );
        }

        let mut stats = IngestStats::default();

        if !doc.headings.is_empty() {
            let vectors = self.encoder.encode_texts(&doc.headings).await?;
            check_batch(vectors.len(), doc.headings.len(), "headings")?;
            for (heading, vector) in doc.headings.iter().zip(vectors) {
                let embedding = unit(vector, || format!("heading {:?} of '{}'", heading, doc.name))?;
                let metadata = DescriptorMetadata::text(&doc.name, heading);
                store.add(&self.set.name, &embedding, &metadata).await?;
                tracing::debug!(set = %self.set.name, doc = %doc.name, heading = %heading, "added text descriptor");
                stats.headings += 1;
            }
        }

        if !doc.images.is_empty() {
            let vectors = self.encoder.encode_images(&doc.images).await?;
            check_batch(vectors.len(), doc.images.len(), "images")?;
            for (index, vector) in vectors.into_iter().enumerate() {
                let embedding = unit(vector, || format!("image {} of '{}'", index, doc.name))?;
                let image_index = u32::try_from(index)?;
                let metadata = DescriptorMetadata::image(&doc.name, image_index);
                store.add(&self.set.name, &embedding, &metadata).await?;
                tracing::debug!(set = %self.set.name, doc = %doc.name, image_index, "added image descriptor");
                stats.images += 1;
            }
        }

        Ok(stats)
    }

    /// Embed a query string into a unit vector.
    pub async fn encode_query(&self, query: &str) -> Result<Vec<f32>> {
        let mut vectors = self.encoder.encode_texts(&[query.to_string()]).await?;
        check_batch(vectors.len(), 1, "query")?;
        unit(vectors.remove(0), || format!("query {:?}", query))
    }

    /// Best-matching descriptor for a free-text query.
    ///
    /// Returns `None` for a blank query, a missing or empty set, or when the
    /// store returns no candidates.
    pub async fn retrieve(
        &self,
        store: &dyn DescriptorStore,
        query: &str,
    ) -> Result<Option<BestMatch>> {
        if query.trim().is_empty() {
            return Ok(None);
        }
        let embedding = self.encode_query(query).await?;
        let hits = store.query(&self.set.name, &embedding, self.k).await?;
        tracing::debug!(set = %self.set.name, candidates = hits.len(), "k-NN query returned");
        Ok(select_best(hits).map(BestMatch::from))
    }
}

fn check_batch(got: usize, expected: usize, what: &str) -> Result<()> {
    if got != expected {
        bail!(
            "Encoder returned {} vectors for {} {}",
            got,
            expected,
            what
        );
    }
    Ok(())
}

fn unit<F>(vector: Vec<f32>, what: F) -> Result<Vec<f32>>
where
    F: FnOnce() -> String,
{
    let norm = l2_norm(&vector);
    if !norm.is_finite() || norm <= f32::EPSILON {
        bail!("Encoder returned a vector with norm {} for {}", norm, what());
    }
    Ok(l2_normalize(vector))
}

/// The hit with the highest score; the earliest one wins ties.
///
/// NaN scores never win.
pub fn select_best(hits: Vec<Hit>) -> Option<Hit> {
    hits.into_iter()
        .filter(|h| !h.score.is_nan())
        .fold(None, |best: Option<Hit>, hit| match best {
            Some(b) if b.score >= hit.score => Some(b),
            _ => Some(hit),
        })
}
