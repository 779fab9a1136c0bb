//! # guide-index core
//!
//! Backend-independent logic for guide-index: descriptor models, heading
//! segmentation, the image policy, the [`Encoder`](embedding::Encoder) and
//! [`DescriptorStore`](store::DescriptorStore) traits, and the generic
//! ingest/retrieve pipeline.
//!
//! This crate has no tokio, sqlx, HTTP or PDF dependencies. Concrete
//! encoders, PDF extraction and the remote/SQLite stores live in the
//! `guide-index` app crate.

pub mod embedding;
pub mod heading;
pub mod images;
pub mod models;
pub mod pipeline;
pub mod store;
