//! Pure-Rust text encoder for targets without ONNX Runtime binaries.
//!
//! Loads the sentence-transformers ONNX export with tract-onnx, tokenizes
//! with the tokenizers crate and mean-pools the last hidden state. Only
//! text models are supported; joint encoders need fastembed.
#![cfg_attr(
    all(feature = "local-encoders-fastembed", feature = "local-encoders-tract"),
    allow(dead_code)
)]

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tract_onnx::prelude::*;

use guide_index_core::embedding::Encoder;

use super::ModelSpec;
use crate::config::EmbeddingConfig;

const MAX_TOKENS: usize = 256;

/// Hugging Face files for a model: (repo, onnx path, tokenizer path).
///
/// Only mean-pooled models belong here. CLS-pooled ones (the bge family)
/// would produce vectors that disagree with the fastembed backend.
fn model_files(name: &str) -> Result<(&'static str, &'static str, &'static str)> {
    match name {
        "all-minilm-l6-v2" => Ok((
            "sentence-transformers/all-MiniLM-L6-v2",
            "onnx/model.onnx",
            "tokenizer.json",
        )),
        other => bail!(
            "tract encoder supports all-minilm-l6-v2 only. Requested: '{}'. \
             Build with local-encoders-fastembed for other models.",
            other
        ),
    }
}

fn default_cache_dir() -> PathBuf {
    let base = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(base)
        .join(".cache")
        .join("guide-index")
        .join("models")
}

fn fetch(repo: &str, file: &str, dest: &Path) -> Result<()> {
    if dest.exists() {
        return Ok(());
    }
    let url = format!("https://huggingface.co/{}/resolve/main/{}", repo, file);
    tracing::info!(%url, "downloading model file");
    let bytes = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .and_then(|r| r.bytes())
        .with_context(|| format!("Download {}", url))?;
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Create cache dir {}", parent.display()))?;
    }
    std::fs::write(dest, &bytes).with_context(|| format!("Write {}", dest.display()))?;
    Ok(())
}

/// Text encoder running an ONNX sentence-embedding model through tract.
pub struct TractTextEncoder {
    spec: &'static ModelSpec,
    batch_size: usize,
    model_dir: PathBuf,
}

impl TractTextEncoder {
    pub fn new(spec: &'static ModelSpec, config: &EmbeddingConfig) -> Result<Self> {
        model_files(spec.name)?;
        let root = config.cache_dir.clone().unwrap_or_else(default_cache_dir);
        Ok(Self {
            spec,
            batch_size: config.batch_size,
            model_dir: root.join(spec.name),
        })
    }
}

#[async_trait]
impl Encoder for TractTextEncoder {
    fn model_name(&self) -> &str {
        self.spec.name
    }

    fn dims(&self) -> usize {
        self.spec.dims
    }

    async fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let name = self.spec.name;
        let dims = self.spec.dims;
        let batch_size = self.batch_size;
        let model_dir = self.model_dir.clone();
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let (repo, onnx_rel, tokenizer_rel) = model_files(name)?;
            let onnx_path = model_dir.join(onnx_rel);
            let tokenizer_path = model_dir.join(tokenizer_rel);
            fetch(repo, onnx_rel, &onnx_path)?;
            fetch(repo, tokenizer_rel, &tokenizer_path)?;
            run(&onnx_path, &tokenizer_path, dims, batch_size, &texts)
        })
        .await?
    }
}

fn run(
    onnx_path: &Path,
    tokenizer_path: &Path,
    dims: usize,
    batch_size: usize,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let tokenizer = tokenizers::Tokenizer::from_file(tokenizer_path)
        .map_err(|e| anyhow!("Load tokenizer: {}", e))?;

    let model = tract_onnx::onnx()
        .model_for_path(onnx_path)
        .map_err(|e| anyhow!("Load ONNX: {}", e))?
        .into_optimized()
        .map_err(|e| anyhow!("Optimize: {}", e))?
        .into_runnable()
        .map_err(|e| anyhow!("Build tract runnable: {}", e))?;

    let mut vectors = Vec::with_capacity(texts.len());

    for batch in texts.chunks(batch_size) {
        let encodings = batch
            .iter()
            .map(|s| {
                tokenizer
                    .encode(s.as_str(), true)
                    .map_err(|e| anyhow!("Tokenize: {}", e))
            })
            .collect::<Result<Vec<_>>>()?;

        let seq_len = encodings
            .iter()
            .map(|e| e.get_ids().len())
            .max()
            .unwrap_or(1)
            .min(MAX_TOKENS);
        let rows = encodings.len();

        let mut input_ids = vec![0i64; rows * seq_len];
        let mut attention_mask = vec![0i64; rows * seq_len];
        let mut token_type_ids = vec![0i64; rows * seq_len];
        for (i, enc) in encodings.iter().enumerate() {
            for (j, &id) in enc.get_ids().iter().take(seq_len).enumerate() {
                input_ids[i * seq_len + j] = i64::from(id);
                attention_mask[i * seq_len + j] = 1;
            }
            for (j, &t) in enc.get_type_ids().iter().take(seq_len).enumerate() {
                token_type_ids[i * seq_len + j] = i64::from(t);
            }
        }

        let to_tensor = |data: Vec<i64>| -> Result<Tensor> {
            Ok(ndarray::Array2::from_shape_vec((rows, seq_len), data)
                .map_err(|e| anyhow!("Input shape: {}", e))?
                .into())
        };
        let outputs = model.run(tvec!(
            to_tensor(input_ids)?.into(),
            to_tensor(attention_mask.clone())?.into(),
            to_tensor(token_type_ids)?.into()
        ))?;

        let hidden = outputs
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("No output tensor"))?;
        let view = hidden
            .to_array_view::<f32>()
            .map_err(|e| anyhow!("Output to array: {}", e))?;

        match view.shape() {
            [_, width] => {
                if *width != dims {
                    bail!("Model produced {} dims, expected {}", width, dims);
                }
                for row in view.outer_iter() {
                    vectors.push(row.iter().copied().collect());
                }
            }
            [_, tokens, width] => {
                if *width != dims {
                    bail!("Model produced {} dims, expected {}", width, dims);
                }
                let tokens = (*tokens).min(seq_len);
                for i in 0..rows {
                    let mut sum = vec![0f32; dims];
                    let mut count = 0f32;
                    for j in 0..tokens {
                        if attention_mask[i * seq_len + j] == 0 {
                            continue;
                        }
                        for (acc, &v) in sum
                            .iter_mut()
                            .zip(view.slice(ndarray::s![i, j, ..]).iter())
                        {
                            *acc += v;
                        }
                        count += 1.0;
                    }
                    if count > 0.0 {
                        sum.iter_mut().for_each(|x| *x /= count);
                    }
                    vectors.push(sum);
                }
            }
            other => bail!("Unexpected output shape: {:?}", other),
        }
    }

    Ok(vectors)
}
