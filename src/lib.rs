//! # Guide Index
//!
//! Indexes step-by-step instructional PDFs into a vector store and answers
//! free-text questions with the guide (and the heading or screenshot within
//! it) that best matches.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌──────────────┐   ┌─────────────────┐
//! │  PDFs    │──▶│  Extract     │──▶│  Encode      │──▶│ Descriptor set  │
//! │          │   │ headings/img │   │ text / joint │   │ ApertureDB/SQL  │
//! └──────────┘   └──────────────┘   └──────────────┘   └────────┬────────┘
//!                                                               │ k-NN (IP)
//!                                        query ──▶ encode ──────┴──▶ best match
//! ```
//!
//! The encoding, normalization and ranking logic lives in the
//! `guide-index-core` crate; this crate supplies the PDF extraction, the
//! model-backed encoders, the store backends and the `guidex` CLI.
//!
//! ## Quick Start
//!
//! ```bash
//! guidex init --pipeline all                    # create descriptor sets
//! guidex ingest ./guides                         # index with the default pipeline
//! guidex ingest ./guides --pipeline multimodal   # headings + screenshots
//! guidex query "how do I invite a teammate"
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`extract`] | Heading and image extraction from PDFs |
//! | [`embedding`] | Local text and joint encoders |
//! | [`pipelines`] | Pipelines built from config |
//! | [`store`] | ApertureDB and SQLite descriptor stores |
//! | [`ingest`] | Ingestion command |
//! | [`query`] | Retrieval command |
//! | [`sets`] | Set creation and status |
//! | [`extract_cmd`] | Extraction preview |
//! | [`db`] | SQLite connection |
//! | [`migrate`] | SQLite schema |

pub mod config;
pub mod db;
pub mod embedding;
pub mod extract;
pub mod extract_cmd;
pub mod ingest;
pub mod migrate;
pub mod pipelines;
pub mod query;
pub mod sets;
pub mod store;
