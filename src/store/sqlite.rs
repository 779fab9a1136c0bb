//! Local SQLite descriptor store.
//!
//! Descriptor sets and descriptors live in two tables (see
//! [`migrate`](crate::migrate)); embeddings are little-endian `f32` BLOBs.
//! Queries are a brute-force inner-product scan over one set, which is
//! what a `Flat` engine does.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::path::Path;

use guide_index_core::embedding::{blob_to_vec, inner_product, vec_to_blob};
use guide_index_core::models::{
    Content, DescriptorMetadata, Hit, SetInfo, SetSpec, ENGINE_FLAT, METRIC_IP,
};
use guide_index_core::store::{check_compatible, rank_hits, DescriptorStore, StoreError};

use crate::{db, migrate};

pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database file and apply the schema.
    pub async fn open(path: &Path) -> Result<Self> {
        let pool = db::connect(path).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    async fn set_dimensions(&self, set: &str) -> Result<Option<usize>> {
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT dimensions FROM descriptor_sets WHERE name = ?")
                .bind(set)
                .fetch_optional(&self.pool)
                .await?;
        Ok(dims.map(|d| d as usize))
    }
}

#[async_trait]
impl DescriptorStore for SqliteStore {
    fn backend_name(&self) -> &str {
        "sqlite"
    }

    async fn create_set(&self, spec: &SetSpec) -> Result<()> {
        if let Some(existing) = self.describe_set(&spec.name).await? {
            check_compatible(&existing, spec)?;
            return Ok(());
        }
        sqlx::query(
            "INSERT INTO descriptor_sets (name, dimensions, engine, metric, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&spec.name)
        .bind(spec.dimensions as i64)
        .bind(ENGINE_FLAT)
        .bind(METRIC_IP)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        tracing::info!(set = %spec.name, dims = spec.dimensions, "created descriptor set");
        Ok(())
    }

    async fn describe_set(&self, name: &str) -> Result<Option<SetInfo>> {
        let row = sqlx::query(
            r#"
            SELECT s.dimensions, s.engine, s.metric,
                   (SELECT COUNT(*) FROM descriptors d WHERE d.set_name = s.name) AS count
            FROM descriptor_sets s
            WHERE s.name = ?
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| SetInfo {
            name: name.to_string(),
            dimensions: r.get::<i64, _>("dimensions") as usize,
            engine: r.get("engine"),
            metric: r.get("metric"),
            count: Some(r.get::<i64, _>("count") as u64),
        }))
    }

    async fn add(
        &self,
        set: &str,
        embedding: &[f32],
        metadata: &DescriptorMetadata,
    ) -> Result<()> {
        let dimensions = self
            .set_dimensions(set)
            .await?
            .ok_or_else(|| StoreError::SetNotFound(set.to_string()))?;
        if embedding.len() != dimensions {
            return Err(StoreError::DimensionMismatch {
                set: set.to_string(),
                expected: dimensions,
                actual: embedding.len(),
            }
            .into());
        }

        let (text, image_index) = match &metadata.content {
            Content::Text { text } => (Some(text.as_str()), None),
            Content::Image { image_index } => (None, Some(i64::from(*image_index))),
        };

        sqlx::query(
            r#"
            INSERT INTO descriptors (id, set_name, pdf_name, text, image_index, embedding, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(set)
        .bind(&metadata.pdf_name)
        .bind(text)
        .bind(image_index)
        .bind(vec_to_blob(embedding))
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn query(&self, set: &str, embedding: &[f32], k: usize) -> Result<Vec<Hit>> {
        let dimensions = match self.set_dimensions(set).await? {
            Some(d) => d,
            None => return Ok(Vec::new()),
        };
        if embedding.len() != dimensions {
            return Err(StoreError::DimensionMismatch {
                set: set.to_string(),
                expected: dimensions,
                actual: embedding.len(),
            }
            .into());
        }

        // rowid order keeps insertion order for equal scores
        let rows = sqlx::query(
            "SELECT pdf_name, text, image_index, embedding FROM descriptors WHERE set_name = ? ORDER BY rowid",
        )
        .bind(set)
        .fetch_all(&self.pool)
        .await?;

        let mut hits = Vec::with_capacity(rows.len());
        for row in rows {
            let pdf_name: String = row.get("pdf_name");
            let text: Option<String> = row.get("text");
            let image_index: Option<i64> = row.get("image_index");
            let blob: Vec<u8> = row.get("embedding");

            let content = match (text, image_index) {
                (Some(text), None) => Content::Text { text },
                (None, Some(index)) => Content::Image {
                    image_index: u32::try_from(index).map_err(|_| {
                        StoreError::InvalidMetadata(format!("image_index out of range: {}", index))
                    })?,
                },
                _ => {
                    return Err(StoreError::InvalidMetadata(format!(
                        "descriptor for '{}' must have exactly one of text/image_index",
                        pdf_name
                    ))
                    .into())
                }
            };

            hits.push(Hit {
                score: inner_product(embedding, &blob_to_vec(&blob)),
                metadata: DescriptorMetadata { pdf_name, content },
            });
        }

        Ok(rank_hits(hits, k))
    }
}
