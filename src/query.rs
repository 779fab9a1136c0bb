//! Retrieval: free-text query → best-matching descriptor.

use anyhow::Result;
use std::path::Path;

use guide_index_core::models::{BestMatch, Content};

use crate::config::Config;
use crate::pipelines;
use crate::store::open_store;

/// Attach `<root>/<pdf_name>.pdf` to a match when that file exists.
pub fn resolve_companion(root: Option<&Path>, best: &mut BestMatch) {
    if let Some(root) = root {
        let candidate = root.join(format!("{}.pdf", best.pdf_name));
        if candidate.is_file() {
            best.companion = Some(candidate);
        }
    }
}

pub async fn run_query(
    config: &Config,
    query: &str,
    which: Option<&str>,
    json: bool,
) -> Result<()> {
    let (name, pipeline_config) = config.pipeline(which)?;
    let pipeline = pipelines::build(config, name, pipeline_config)?;
    let store = open_store(config).await?;

    let mut best = pipeline.retrieve(store.as_ref(), query).await?;
    if let Some(best) = best.as_mut() {
        resolve_companion(config.corpus.root.as_deref(), best);
        tracing::info!(pdf = %best.pdf_name, similarity = best.similarity, "best match");
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&best)?);
        return Ok(());
    }

    match best {
        None => println!("No match."),
        Some(best) => {
            println!(
                "best match ({}) similarity {:.4}",
                best.modality().as_str(),
                best.similarity
            );
            println!("  pdf: {}", best.pdf_name);
            match &best.content {
                Content::Text { text } => println!("  text: {}", text),
                Content::Image { image_index } => println!("  image_index: {}", image_index),
            }
            if let Some(path) = &best.companion {
                println!("  companion: {}", path.display());
            }
        }
    }
    Ok(())
}
