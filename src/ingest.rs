//! Ingestion: PDFs → segments → embeddings → descriptor set.
//!
//! Documents are processed one at a time, in path order. Within a document,
//! headings are written before images. A document that fails to extract or
//! encode aborts the run; descriptors already written stay in the set.

use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use guide_index_core::heading::headings_from_pages;
use guide_index_core::pipeline::{IngestStats, Pipeline};
use guide_index_core::store::DescriptorStore;

use crate::config::{Config, EncoderKind};
use crate::extract::{self, extract_document};
use crate::pipelines;
use crate::store::open_store;

/// Expand files and directories into the PDFs to ingest.
///
/// Directories are walked recursively for `*.pdf` (any case). The result
/// is sorted and free of duplicates.
pub fn collect_pdfs(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut pdfs = Vec::new();
    for path in paths {
        if path.is_dir() {
            for entry in WalkDir::new(path).follow_links(true) {
                let entry = entry.with_context(|| format!("walking {}", path.display()))?;
                if entry.file_type().is_file() && is_pdf(entry.path()) {
                    pdfs.push(entry.into_path());
                }
            }
        } else if path.is_file() {
            pdfs.push(path.clone());
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    pdfs.sort();
    pdfs.dedup();
    Ok(pdfs)
}

fn is_pdf(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Totals for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub documents: usize,
    pub headings: usize,
    pub images: usize,
}

/// Extract and index every PDF into the pipeline's set.
///
/// Images are extracted only when the pipeline's encoder embeds them.
pub async fn ingest_pdfs(
    config: &Config,
    store: &dyn DescriptorStore,
    pipeline: &Pipeline,
    pdfs: &[PathBuf],
) -> Result<IngestSummary> {
    let rules = config.extract.heading_rules()?;
    let policy = config.images.policy();
    let artifacts = pipeline
        .encoder
        .supports_images()
        .then_some(config.extract.artifacts_dir.as_path());

    pipeline.ensure_set(store).await?;

    let mut summary = IngestSummary::default();
    for pdf in pdfs {
        let segments = extract_document(pdf, &rules, &policy, artifacts)
            .with_context(|| format!("Failed to extract {}", pdf.display()))?;
        let IngestStats { headings, images } = pipeline
            .ingest(store, &segments)
            .await
            .with_context(|| format!("Failed to index {}", pdf.display()))?;
        tracing::info!(doc = %segments.name, headings, images, set = %pipeline.set.name, "indexed document");
        println!("  {}: {} headings, {} images", segments.name, headings, images);

        summary.documents += 1;
        summary.headings += headings;
        summary.images += images;
    }
    Ok(summary)
}

pub async fn run_ingest(
    config: &Config,
    paths: &[PathBuf],
    which: Option<&str>,
    dry_run: bool,
) -> Result<()> {
    let pdfs = collect_pdfs(paths)?;
    if pdfs.is_empty() {
        bail!("No PDF files found");
    }
    let (name, pipeline_config) = config.pipeline(which)?;

    if dry_run {
        let with_images = pipeline_config.encoder == EncoderKind::Joint;
        return dry_run_report(config, name, with_images, &pipeline_config.set, &pdfs);
    }

    let pipeline = pipelines::build(config, name, pipeline_config)?;
    let store = open_store(config).await?;

    println!(
        "ingest {} -> {} ({}, {})",
        name,
        pipeline.set.name,
        pipeline.encoder.model_name(),
        store.backend_name()
    );
    let summary = ingest_pdfs(config, store.as_ref(), &pipeline, &pdfs).await?;
    println!("  documents: {}", summary.documents);
    println!(
        "  descriptors written: {} ({} text, {} image)",
        summary.headings + summary.images,
        summary.headings,
        summary.images
    );
    println!("ok");
    Ok(())
}

fn dry_run_report(
    config: &Config,
    name: &str,
    with_images: bool,
    set: &str,
    pdfs: &[PathBuf],
) -> Result<()> {
    let rules = config.extract.heading_rules()?;
    let policy = config.images.policy();

    println!("ingest {} -> {} (dry-run)", name, set);
    let mut headings = 0;
    let mut images = 0;
    for pdf in pdfs {
        let doc = extract::document_name(pdf)?;
        let bytes =
            std::fs::read(pdf).with_context(|| format!("Failed to read {}", pdf.display()))?;
        let found = headings_from_pages(&rules, &extract::page_texts(&bytes)?);
        let kept = if with_images {
            policy
                .apply(&doc, extract::extract_images(&bytes)?, extract::ExtractedImage::size)
                .len()
        } else {
            0
        };
        println!("  {}: {} headings, {} images", doc, found.len(), kept);
        headings += found.len();
        images += kept;
    }
    println!("  documents: {}", pdfs.len());
    println!("  descriptors to write: {}", headings + images);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collect_walks_directories_for_pdfs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("team");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("b_guide.pdf"), b"%PDF").unwrap();
        std::fs::write(nested.join("a_guide.PDF"), b"%PDF").unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"x").unwrap();

        let pdfs = collect_pdfs(&[dir.path().to_path_buf()]).unwrap();
        assert_eq!(
            pdfs,
            vec![dir.path().join("b_guide.pdf"), nested.join("a_guide.PDF")]
        );
    }

    #[test]
    fn collect_dedups_and_rejects_missing() {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("guide.pdf");
        std::fs::write(&pdf, b"%PDF").unwrap();

        let pdfs = collect_pdfs(&[pdf.clone(), dir.path().to_path_buf()]).unwrap();
        assert_eq!(pdfs, vec![pdf]);

        assert!(collect_pdfs(&[dir.path().join("missing.pdf")]).is_err());
    }
}
