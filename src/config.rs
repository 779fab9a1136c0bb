use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use guide_index_core::heading::{
    HeadingRules, DEFAULT_BOILERPLATE, DEFAULT_MIN_HEADING_CHARS, DEFAULT_PLACEHOLDER,
};
use guide_index_core::images::ImagePolicy;

use crate::embedding;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default = "default_pipeline_name")]
    pub default_pipeline: String,
    pub store: StoreConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub images: ImagesConfig,
    #[serde(default)]
    pub corpus: CorpusConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default = "default_pipelines")]
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

fn default_pipeline_name() -> String {
    "text".to_string()
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Aperturedb,
    Sqlite,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub aperturedb: Option<ApertureDbConfig>,
    pub sqlite: Option<SqliteConfig>,
}

/// Connection settings for the remote vector service.
///
/// The password is never stored in the file; it is read from the
/// environment variable named by `password_env`.
#[derive(Debug, Deserialize, Clone)]
pub struct ApertureDbConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_password_env")]
    pub password_env: String,
    #[serde(default = "default_use_ssl")]
    pub use_ssl: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub max_retries: u32,
}

fn default_port() -> u16 {
    443
}
fn default_username() -> String {
    "admin".to_string()
}
fn default_password_env() -> String {
    "APERTUREDB_PASSWORD".to_string()
}
fn default_use_ssl() -> bool {
    true
}
fn default_timeout_secs() -> u64 {
    30
}

impl ApertureDbConfig {
    pub fn url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{}://{}:{}/api/", scheme, self.host, self.port)
    }

    pub fn password(&self) -> Result<String> {
        std::env::var(&self.password_env).with_context(|| {
            format!(
                "{} environment variable not set (store.aperturedb.password_env)",
                self.password_env
            )
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractConfig {
    #[serde(default = "default_boilerplate_patterns")]
    pub boilerplate_patterns: Vec<String>,
    #[serde(default = "default_placeholder_texts")]
    pub placeholder_texts: Vec<String>,
    #[serde(default = "default_min_heading_chars")]
    pub min_heading_chars: usize,
    #[serde(default = "default_artifacts_dir")]
    pub artifacts_dir: PathBuf,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            boilerplate_patterns: default_boilerplate_patterns(),
            placeholder_texts: default_placeholder_texts(),
            min_heading_chars: default_min_heading_chars(),
            artifacts_dir: default_artifacts_dir(),
        }
    }
}

fn default_boilerplate_patterns() -> Vec<String> {
    vec![DEFAULT_BOILERPLATE.to_string()]
}
fn default_placeholder_texts() -> Vec<String> {
    vec![DEFAULT_PLACEHOLDER.to_string()]
}
fn default_min_heading_chars() -> usize {
    DEFAULT_MIN_HEADING_CHARS
}
fn default_artifacts_dir() -> PathBuf {
    PathBuf::from("extracted_images")
}

impl ExtractConfig {
    pub fn heading_rules(&self) -> Result<HeadingRules> {
        HeadingRules::new(
            &self.boilerplate_patterns,
            &self.placeholder_texts,
            self.min_heading_chars,
        )
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ImagesConfig {
    #[serde(default)]
    pub skip_first: usize,
    #[serde(default)]
    pub min_side: u32,
    #[serde(default)]
    pub skip: HashMap<String, Vec<usize>>,
}

impl ImagesConfig {
    pub fn policy(&self) -> ImagePolicy {
        ImagePolicy {
            skip_first: self.skip_first,
            skip: self.skip.clone(),
            min_side: self.min_side,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CorpusConfig {
    /// Directory holding the source PDFs, used to resolve a match's companion file.
    pub root: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    #[serde(default = "default_show_download_progress")]
    pub show_download_progress: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            cache_dir: None,
            show_download_progress: default_show_download_progress(),
        }
    }
}

fn default_batch_size() -> usize {
    32
}
fn default_show_download_progress() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EncoderKind {
    /// Sentence-embedding model; headings only.
    Text,
    /// Vision-language model; headings and images in one space.
    Joint,
}

impl EncoderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncoderKind::Text => "text",
            EncoderKind::Joint => "joint",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            EncoderKind::Text => "all-minilm-l6-v2",
            EncoderKind::Joint => "clip-vit-b32",
        }
    }

    pub fn default_k(&self) -> usize {
        match self {
            EncoderKind::Text => 20,
            EncoderKind::Joint => 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PipelineConfig {
    pub set: String,
    pub encoder: EncoderKind,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
}

impl PipelineConfig {
    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .unwrap_or_else(|| self.encoder.default_model())
    }

    pub fn k(&self) -> usize {
        self.k.unwrap_or_else(|| self.encoder.default_k())
    }
}

fn default_pipelines() -> BTreeMap<String, PipelineConfig> {
    let mut pipelines = BTreeMap::new();
    pipelines.insert(
        "text".to_string(),
        PipelineConfig {
            set: "pdf_instructions".to_string(),
            encoder: EncoderKind::Text,
            model: None,
            k: None,
        },
    );
    pipelines.insert(
        "multimodal".to_string(),
        PipelineConfig {
            set: "pdf_instructions_image_text".to_string(),
            encoder: EncoderKind::Joint,
            model: None,
            k: None,
        },
    );
    pipelines
}

impl Config {
    /// Look up a pipeline by name, falling back to `default_pipeline`.
    pub fn pipeline(&self, name: Option<&str>) -> Result<(&str, &PipelineConfig)> {
        let name = name.unwrap_or(&self.default_pipeline);
        match self.pipelines.get_key_value(name) {
            Some((k, p)) => Ok((k.as_str(), p)),
            None => bail!(
                "Unknown pipeline: '{}'. Available: {}",
                name,
                self.pipelines.keys().cloned().collect::<Vec<_>>().join(", ")
            ),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    // Validate store
    match config.store.backend {
        StoreBackend::Aperturedb => {
            let adb = config.store.aperturedb.as_ref().ok_or_else(|| {
                anyhow::anyhow!("store.backend = \"aperturedb\" requires a [store.aperturedb] section")
            })?;
            if adb.host.trim().is_empty() {
                bail!("store.aperturedb.host must not be empty");
            }
        }
        StoreBackend::Sqlite => {
            if config.store.sqlite.is_none() {
                bail!("store.backend = \"sqlite\" requires a [store.sqlite] section");
            }
        }
    }

    // Validate extraction rules
    config.extract.heading_rules()?;

    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    // Validate pipelines
    if config.pipelines.is_empty() {
        bail!("at least one [pipelines.<name>] must be configured");
    }
    for (name, p) in &config.pipelines {
        if p.set.trim().is_empty() {
            bail!("pipelines.{}.set must not be empty", name);
        }
        if p.k() == 0 {
            bail!("pipelines.{}.k must be >= 1", name);
        }
        embedding::resolve_model(p.encoder, p.model())
            .with_context(|| format!("Invalid model for pipeline '{}'", name))?;
    }
    if !config.pipelines.contains_key(&config.default_pipeline) {
        bail!(
            "default_pipeline '{}' is not a configured pipeline",
            config.default_pipeline
        );
    }

    Ok(config)
}
