//! `guidex extract`: show what ingestion would take from one PDF.

use anyhow::{Context, Result};
use std::path::Path;

use crate::config::Config;
use crate::extract::extract_document;

pub fn run_extract(config: &Config, pdf: &Path, images: bool) -> Result<()> {
    let rules = config.extract.heading_rules()?;
    let policy = config.images.policy();
    let artifacts = images.then_some(config.extract.artifacts_dir.as_path());

    let segments = extract_document(pdf, &rules, &policy, artifacts)
        .with_context(|| format!("Failed to extract {}", pdf.display()))?;

    println!("{}", segments.name);
    println!("  headings: {}", segments.headings.len());
    for (i, heading) in segments.headings.iter().enumerate() {
        println!("    {:>3}. {}", i + 1, heading);
    }
    if images {
        println!("  images: {}", segments.images.len());
        for path in &segments.images {
            println!("    {}", path.display());
        }
    }
    Ok(())
}
