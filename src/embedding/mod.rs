//! Local encoders behind the core [`Encoder`] trait.
//!
//! Models run in-process; nothing leaves the machine after the first
//! download into the model cache.
//!
//! | Encoder kind | Backend | Models |
//! |--------------|---------|--------|
//! | `text` | fastembed | `all-minilm-l6-v2`, `bge-*-en-v1.5`, `nomic-embed-text-v1.5` |
//! | `text` | tract (fallback) | `all-minilm-l6-v2` |
//! | `joint` | fastembed | `clip-vit-b32`, `nomic-embed-v1.5` |
//!
//! A joint model pairs a text tower and an image tower that embed into the
//! same space, so headings, screenshots and queries are comparable.
//!
//! Dimensions come from the static [`MODELS`] table, so a pipeline's
//! descriptor set can be declared without loading any weights.
//!
//! ```rust
//! use guide_index::config::EncoderKind;
//! use guide_index::embedding::resolve_model;
//!
//! let spec = resolve_model(EncoderKind::Text, "all-minilm-l6-v2").unwrap();
//! assert_eq!(spec.dims, 384);
//! assert!(resolve_model(EncoderKind::Joint, "all-minilm-l6-v2").is_err());
//! ```

#[cfg(feature = "local-encoders-tract")]
mod local_tract;

use anyhow::{bail, Result};
use std::sync::Arc;

use guide_index_core::embedding::Encoder;

use crate::config::{EmbeddingConfig, EncoderKind, PipelineConfig};

/// A model the local encoders know how to load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: &'static str,
    pub kind: EncoderKind,
    pub dims: usize,
}

pub const MODELS: &[ModelSpec] = &[
    ModelSpec {
        name: "all-minilm-l6-v2",
        kind: EncoderKind::Text,
        dims: 384,
    },
    ModelSpec {
        name: "bge-small-en-v1.5",
        kind: EncoderKind::Text,
        dims: 384,
    },
    ModelSpec {
        name: "bge-base-en-v1.5",
        kind: EncoderKind::Text,
        dims: 768,
    },
    ModelSpec {
        name: "bge-large-en-v1.5",
        kind: EncoderKind::Text,
        dims: 1024,
    },
    ModelSpec {
        name: "nomic-embed-text-v1.5",
        kind: EncoderKind::Text,
        dims: 768,
    },
    ModelSpec {
        name: "clip-vit-b32",
        kind: EncoderKind::Joint,
        dims: 512,
    },
    ModelSpec {
        name: "nomic-embed-v1.5",
        kind: EncoderKind::Joint,
        dims: 768,
    },
];

/// Look up a model by name for the given encoder kind.
pub fn resolve_model(kind: EncoderKind, name: &str) -> Result<&'static ModelSpec> {
    match MODELS.iter().find(|m| m.kind == kind && m.name == name) {
        Some(spec) => Ok(spec),
        None => bail!(
            "Unknown {} encoder model: '{}'. Supported models: {}",
            kind.as_str(),
            name,
            MODELS
                .iter()
                .filter(|m| m.kind == kind)
                .map(|m| m.name)
                .collect::<Vec<_>>()
                .join(", ")
        ),
    }
}

/// Build the encoder a pipeline is configured with.
///
/// No model is loaded here; weights are fetched and loaded on the first
/// encode call.
pub fn create_encoder(
    pipeline: &PipelineConfig,
    config: &EmbeddingConfig,
) -> Result<Arc<dyn Encoder>> {
    let spec = resolve_model(pipeline.encoder, pipeline.model())?;

    #[cfg(feature = "local-encoders-fastembed")]
    {
        Ok(Arc::new(FastembedEncoder::new(spec, config)))
    }

    #[cfg(all(
        feature = "local-encoders-tract",
        not(feature = "local-encoders-fastembed")
    ))]
    {
        if spec.kind == EncoderKind::Joint {
            bail!(
                "Joint encoder '{}' requires --features local-encoders-fastembed",
                spec.name
            );
        }
        Ok(Arc::new(local_tract::TractTextEncoder::new(spec, config)?))
    }

    #[cfg(not(any(
        feature = "local-encoders-fastembed",
        feature = "local-encoders-tract"
    )))]
    {
        let _ = config;
        bail!(
            "Encoder '{}' requires one of: --features local-encoders-fastembed, --features local-encoders-tract",
            spec.name
        )
    }
}

/// Metadata-only encoder used where only the set schema is needed.
///
/// `init` and `sets` declare descriptor sets from the model table without
/// pulling any weights; encoding through this type always fails.
pub struct SchemaOnly {
    spec: &'static ModelSpec,
}

impl SchemaOnly {
    pub fn new(pipeline: &PipelineConfig) -> Result<Self> {
        Ok(Self {
            spec: resolve_model(pipeline.encoder, pipeline.model())?,
        })
    }
}

#[async_trait::async_trait]
impl Encoder for SchemaOnly {
    fn model_name(&self) -> &str {
        self.spec.name
    }
    fn dims(&self) -> usize {
        self.spec.dims
    }
    fn supports_images(&self) -> bool {
        self.spec.kind == EncoderKind::Joint
    }
    async fn encode_texts(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        bail!("Encoder '{}' is not loaded", self.spec.name)
    }
}

// ============ fastembed ============

#[cfg(feature = "local-encoders-fastembed")]
pub use fastembed_encoder::FastembedEncoder;

#[cfg(feature = "local-encoders-fastembed")]
mod fastembed_encoder {
    use anyhow::{anyhow, bail, Result};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    use guide_index_core::embedding::Encoder;

    use super::ModelSpec;
    use crate::config::{EmbeddingConfig, EncoderKind};

    fn text_model(name: &str) -> Result<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            "nomic-embed-text-v1.5" | "nomic-embed-v1.5" => {
                Ok(fastembed::EmbeddingModel::NomicEmbedTextV15)
            }
            "clip-vit-b32" => Ok(fastembed::EmbeddingModel::ClipVitB32),
            other => bail!("No fastembed text model for '{}'", other),
        }
    }

    fn image_model(name: &str) -> Result<fastembed::ImageEmbeddingModel> {
        match name {
            "clip-vit-b32" => Ok(fastembed::ImageEmbeddingModel::ClipVitB32),
            "nomic-embed-v1.5" => Ok(fastembed::ImageEmbeddingModel::NomicEmbedVisionV15),
            other => bail!("No fastembed image model for '{}'", other),
        }
    }

    /// fastembed-backed encoder; text-only or joint depending on the model.
    ///
    /// Each tower is loaded once, on first use, and kept for the life of
    /// the encoder. Inference runs on the blocking pool.
    pub struct FastembedEncoder {
        spec: &'static ModelSpec,
        batch_size: usize,
        cache_dir: Option<PathBuf>,
        show_download_progress: bool,
        text: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
        image: Arc<Mutex<Option<fastembed::ImageEmbedding>>>,
    }

    impl FastembedEncoder {
        pub fn new(spec: &'static ModelSpec, config: &EmbeddingConfig) -> Self {
            Self {
                spec,
                batch_size: config.batch_size,
                cache_dir: config.cache_dir.clone(),
                show_download_progress: config.show_download_progress,
                text: Arc::new(Mutex::new(None)),
                image: Arc::new(Mutex::new(None)),
            }
        }
    }

    #[async_trait]
    impl Encoder for FastembedEncoder {
        fn model_name(&self) -> &str {
            self.spec.name
        }

        fn dims(&self) -> usize {
            self.spec.dims
        }

        fn supports_images(&self) -> bool {
            self.spec.kind == EncoderKind::Joint
        }

        async fn encode_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let model_id = text_model(self.spec.name)?;
            let mut options = fastembed::InitOptions::new(model_id)
                .with_show_download_progress(self.show_download_progress);
            if let Some(dir) = &self.cache_dir {
                options = options.with_cache_dir(dir.clone());
            }
            let name = self.spec.name;
            let slot = Arc::clone(&self.text);
            let batch_size = self.batch_size;
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| anyhow!("text encoder lock poisoned"))?;
                if guard.is_none() {
                    tracing::info!(model = name, "loading text encoder");
                    let model = fastembed::TextEmbedding::try_new(options)
                        .map_err(|e| anyhow!("Failed to initialize text encoder: {}", e))?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| anyhow!("text encoder not loaded"))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Text encoding failed: {}", e))
            })
            .await?
        }

        async fn encode_images(&self, paths: &[PathBuf]) -> Result<Vec<Vec<f32>>> {
            if !self.supports_images() {
                bail!("Encoder '{}' does not embed images", self.spec.name);
            }
            if paths.is_empty() {
                return Ok(Vec::new());
            }
            let model_id = image_model(self.spec.name)?;
            let mut options = fastembed::ImageInitOptions::new(model_id)
                .with_show_download_progress(self.show_download_progress);
            if let Some(dir) = &self.cache_dir {
                options = options.with_cache_dir(dir.clone());
            }
            let name = self.spec.name;
            let slot = Arc::clone(&self.image);
            let batch_size = self.batch_size;
            let paths = paths.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| anyhow!("image encoder lock poisoned"))?;
                if guard.is_none() {
                    tracing::info!(model = name, "loading image encoder");
                    let model = fastembed::ImageEmbedding::try_new(options)
                        .map_err(|e| anyhow!("Failed to initialize image encoder: {}", e))?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| anyhow!("image encoder not loaded"))?;
                model
                    .embed(paths, Some(batch_size))
                    .map_err(|e| anyhow!("Image encoding failed: {}", e))
            })
            .await?
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipeline(encoder: EncoderKind, model: Option<&str>) -> PipelineConfig {
        PipelineConfig {
            set: "s".to_string(),
            encoder,
            model: model.map(str::to_string),
            k: None,
        }
    }

    #[test]
    fn default_models_resolve() {
        let text = resolve_model(EncoderKind::Text, EncoderKind::Text.default_model()).unwrap();
        assert_eq!(text.dims, 384);
        let joint = resolve_model(EncoderKind::Joint, EncoderKind::Joint.default_model()).unwrap();
        assert_eq!(joint.dims, 512);
    }

    #[test]
    fn unknown_model_lists_supported() {
        let err = resolve_model(EncoderKind::Joint, "siglip").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("clip-vit-b32"));
        assert!(msg.contains("nomic-embed-v1.5"));
        assert!(!msg.contains("all-minilm-l6-v2"));
    }

    #[test]
    fn model_names_are_unique() {
        for (i, a) in MODELS.iter().enumerate() {
            for b in &MODELS[i + 1..] {
                assert_ne!(a.name, b.name);
            }
        }
    }

    #[tokio::test]
    async fn schema_only_reports_dims_and_refuses_to_encode() {
        let enc = SchemaOnly::new(&pipeline(EncoderKind::Joint, Some("nomic-embed-v1.5"))).unwrap();
        assert_eq!(enc.dims(), 768);
        assert!(enc.supports_images());
        assert!(enc.encode_texts(&["x".to_string()]).await.is_err());
    }

    #[test]
    fn create_encoder_does_not_load_weights() {
        let enc = create_encoder(
            &pipeline(EncoderKind::Text, None),
            &EmbeddingConfig::default(),
        );
        #[cfg(any(feature = "local-encoders-fastembed", feature = "local-encoders-tract"))]
        {
            let enc = enc.unwrap();
            assert_eq!(enc.model_name(), "all-minilm-l6-v2");
            assert_eq!(enc.dims(), 384);
            assert!(!enc.supports_images());
        }
        #[cfg(not(any(feature = "local-encoders-fastembed", feature = "local-encoders-tract")))]
        assert!(enc.is_err());
    }
}
