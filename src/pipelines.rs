//! Building [`Pipeline`]s from `[pipelines.<name>]` config entries.

use anyhow::Result;
use std::sync::Arc;

use guide_index_core::pipeline::Pipeline;

use crate::config::{Config, PipelineConfig};
use crate::embedding::{create_encoder, SchemaOnly};

/// Pipelines named by a `--pipeline` argument: one name, `all`, or the
/// configured default when absent.
pub fn select<'a>(
    config: &'a Config,
    which: Option<&str>,
) -> Result<Vec<(&'a str, &'a PipelineConfig)>> {
    match which {
        Some("all") => Ok(config
            .pipelines
            .iter()
            .map(|(name, p)| (name.as_str(), p))
            .collect()),
        other => Ok(vec![config.pipeline(other)?]),
    }
}

/// A pipeline with a working encoder; model weights load on first use.
pub fn build(config: &Config, name: &str, pipeline: &PipelineConfig) -> Result<Pipeline> {
    let encoder = create_encoder(pipeline, &config.embedding)?;
    Ok(Pipeline::new(name, &pipeline.set, encoder, pipeline.k()))
}

/// A pipeline that only knows its set schema; enough for set management.
pub fn schema(name: &str, pipeline: &PipelineConfig) -> Result<Pipeline> {
    let encoder = Arc::new(SchemaOnly::new(pipeline)?);
    Ok(Pipeline::new(name, &pipeline.set, encoder, pipeline.k()))
}
