//! TOML configuration.
//!
//! Every section has defaults so a config file only needs the values it
//! changes; [`Config::minimal`] is the all-defaults configuration used by
//! commands that run without a file.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkProfile;
use crate::issue::IssueNormalizer;
use crate::normalize::Normalizer;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub uploads: UploadsConfig,
    #[serde(default)]
    pub issues: IssuesConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./data/docchat.sqlite"),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_collection")]
    pub collection: String,
    /// Files or directories ingested when an empty collection is built.
    #[serde(default)]
    pub seed_paths: Vec<PathBuf>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            collection: default_collection(),
            seed_paths: Vec::new(),
        }
    }
}

fn default_collection() -> String {
    "example_collection".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
    #[serde(default = "default_field_chunk_size")]
    pub field_chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub field_chunk_overlap: usize,
    #[serde(default = "default_comment_max_chars")]
    pub comment_max_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
            field_chunk_size: default_field_chunk_size(),
            field_chunk_overlap: default_chunk_overlap(),
            comment_max_chars: default_comment_max_chars(),
        }
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_chunk_overlap() -> usize {
    200
}
fn default_field_chunk_size() -> usize {
    2000
}
fn default_comment_max_chars() -> usize {
    crate::issue::DEFAULT_COMMENT_MAX_CHARS
}

impl ChunkingConfig {
    /// Generic profile for PDF and text pages.
    pub fn page_profile(&self) -> ChunkProfile {
        ChunkProfile::generic().with_size(self.chunk_size, self.chunk_overlap)
    }

    /// Structured-field profile for issue fields and long comments.
    pub fn field_profile(&self) -> ChunkProfile {
        ChunkProfile::structured_field().with_size(self.field_chunk_size, self.field_chunk_overlap)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_score_threshold")]
    pub score_threshold: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            score_threshold: default_score_threshold(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_score_threshold() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default = "default_embedding_model")]
    pub model: Option<String>,
    #[serde(default = "default_embedding_dims")]
    pub dims: Option<usize>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            dims: default_embedding_dims(),
            url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "ollama".to_string()
}
fn default_embedding_model() -> Option<String> {
    Some("all-minilm".to_string())
}
fn default_embedding_dims() -> Option<usize> {
    Some(384)
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    /// Deterministic offline embeddings, mostly for tests and demos.
    pub fn hash(dims: usize) -> Self {
        Self {
            provider: "hash".to_string(),
            model: Some("hash".to_string()),
            dims: Some(dims),
            ..Self::default()
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_generation_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            url: None,
            timeout_secs: default_generation_timeout_secs(),
            max_retries: default_generation_max_retries(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_generation_provider() -> String {
    "ollama".to_string()
}
fn default_generation_model() -> String {
    "llama3.1".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}
fn default_generation_max_retries() -> u32 {
    2
}
fn default_system_prompt() -> String {
    crate::chat::RAG_INSTRUCTIONS.to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct UploadsConfig {
    #[serde(default = "default_uploads_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_ledger_path")]
    pub ledger: PathBuf,
}

impl Default for UploadsConfig {
    fn default() -> Self {
        Self {
            dir: default_uploads_dir(),
            ledger: default_ledger_path(),
        }
    }
}

fn default_uploads_dir() -> PathBuf {
    PathBuf::from("./data/uploads")
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("./data/uploads/files_metadata.json")
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct IssuesConfig {
    /// Base URL for issue links, e.g. `https://tracker.example/browse`.
    #[serde(default)]
    pub browse_url: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// All-defaults configuration.
    pub fn minimal() -> Self {
        Self::default()
    }

    /// Chunking policy for every document kind.
    pub fn normalizer(&self) -> Normalizer {
        Normalizer::new(
            self.chunking.page_profile(),
            IssueNormalizer {
                field_profile: self.chunking.field_profile(),
                comment_max_chars: self.chunking.comment_max_chars,
                browse_url: self.issues.browse_url.clone(),
            },
        )
    }

    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 || c.field_chunk_size == 0 {
            bail!("chunking.chunk_size and chunking.field_chunk_size must be > 0");
        }
        if c.chunk_overlap >= c.chunk_size {
            bail!("chunking.chunk_overlap must be < chunking.chunk_size");
        }
        if c.field_chunk_overlap >= c.field_chunk_size {
            bail!("chunking.field_chunk_overlap must be < chunking.field_chunk_size");
        }
        if c.comment_max_chars == 0 {
            bail!("chunking.comment_max_chars must be > 0");
        }

        if self.retrieval.k < 1 {
            bail!("retrieval.k must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.retrieval.score_threshold) {
            bail!("retrieval.score_threshold must be in [0.0, 1.0]");
        }

        if self.index.collection.trim().is_empty() {
            bail!("index.collection must not be empty");
        }

        let e = &self.embedding;
        match e.provider.as_str() {
            "disabled" | "hash" | "local" => {}
            "openai" | "ollama" => {
                if e.model.is_none() {
                    bail!(
                        "embedding.model must be specified when provider is '{}'",
                        e.provider
                    );
                }
                if e.dims.is_none() || e.dims == Some(0) {
                    bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
                }
            }
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, hash, openai, ollama, or local.",
                other
            ),
        }
        if e.provider == "hash" && e.dims == Some(0) {
            bail!("embedding.dims must be > 0 when provider is 'hash'");
        }
        if e.batch_size == 0 {
            bail!("embedding.batch_size must be > 0");
        }

        match self.generation.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }

        Ok(())
    }
}

/// Read, parse, and validate a config file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}

/// Config written by `docchat init`.
pub const CONFIG_TEMPLATE: &str = r#"[db]
path = "./data/docchat.sqlite"

[index]
collection = "example_collection"
# Files or directories ingested when the collection is empty.
seed_paths = []

[chunking]
chunk_size = 1000
chunk_overlap = 200
field_chunk_size = 2000
field_chunk_overlap = 200
comment_max_chars = 1800

[retrieval]
k = 5
score_threshold = 0.2

[embedding]
provider = "ollama"
model = "all-minilm"
dims = 384
# url = "http://localhost:11434"

[generation]
provider = "ollama"
model = "llama3.1"
# url = "http://localhost:11434"
# Instructions placed ahead of the retrieved context.
# system_prompt = "You are a helpful assistant. Use the CONTEXT to answer the QUESTION."

[uploads]
dir = "./data/uploads"
ledger = "./data/uploads/files_metadata.json"

[issues]
# browse_url = "https://tracker.example/browse"

[server]
bind = "127.0.0.1:8000"

[logging]
level = "info"
"#;
