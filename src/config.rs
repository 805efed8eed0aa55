//! Configuration parsing and validation.
//!
//! catalog-rag is configured via a TOML file (default `config/crag.toml`).
//! Secrets are never read from the file: API keys come from the
//! environment (`OPENAI_API_KEY`, `AZURE_OPENAI_API_KEY`,
//! `EMB_OPENAI_API_KEY`).
//!
//! ```toml
//! [db]
//! path = "./data/catalog.sqlite"
//!
//! [index]
//! dir = "./data/index"
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//!
//! [server]
//! bind = "127.0.0.1:8000"
//! ```

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use catalog_rag_core::conversation::DEFAULT_SUMMARY_THRESHOLD;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub conversation: ConversationConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// Directory holding `vectors.sqlite`.
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Catalog table mirrored into the index.
    #[serde(default = "default_index_table")]
    pub table: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            table: default_index_table(),
        }
    }
}

impl IndexConfig {
    pub fn store_path(&self) -> PathBuf {
        self.dir.join("vectors.sqlite")
    }
}

fn default_index_dir() -> PathBuf {
    PathBuf::from("./data/index")
}
fn default_index_table() -> String {
    "products".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Azure endpoint or Ollama base URL.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
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
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            api_version: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model name, or deployment name for Azure.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub api_version: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            api_version: None,
            temperature: None,
            max_retries: default_llm_retries(),
            timeout_secs: default_llm_timeout_secs(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
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
fn default_llm_retries() -> u32 {
    2
}
fn default_llm_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct RetrievalConfig {
    /// Maximum hits per retrieval. `0` searches the whole index.
    #[serde(default)]
    pub top_k: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConversationConfig {
    /// Stored messages before a turn that trigger summarization.
    #[serde(default = "default_summary_threshold")]
    pub summary_threshold: usize,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            summary_threshold: default_summary_threshold(),
        }
    }
}

fn default_summary_threshold() -> usize {
    DEFAULT_SUMMARY_THRESHOLD
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

impl Config {
    /// Defaults with the given database path; providers disabled.
    pub fn minimal(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig {
                path: db_path.into(),
            },
            index: IndexConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            conversation: ConversationConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

const PROVIDERS: [&str; 4] = ["disabled", "openai", "azure", "ollama"];

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    if config.conversation.summary_threshold == 0 {
        anyhow::bail!("conversation.summary_threshold must be >= 1");
    }

    if config.index.table.trim().is_empty() {
        anyhow::bail!("index.table must not be empty");
    }

    // Validate embedding
    let emb = &config.embedding;
    if !PROVIDERS.contains(&emb.provider.as_str()) && emb.provider != "local" {
        anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, azure, ollama, or local.",
            emb.provider
        );
    }
    if emb.is_enabled() && emb.provider != "local" {
        if emb.dims.is_none() || emb.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                emb.provider
            );
        }
        if emb.model.is_none() {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                emb.provider
            );
        }
    }
    if emb.provider == "azure" && emb.url.is_none() {
        anyhow::bail!("embedding.url (Azure endpoint) is required for provider 'azure'");
    }
    if emb.batch_size == 0 {
        anyhow::bail!("embedding.batch_size must be > 0");
    }
    if emb.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }

    // Validate llm
    let llm = &config.llm;
    if !PROVIDERS.contains(&llm.provider.as_str()) {
        anyhow::bail!(
            "Unknown llm provider: '{}'. Must be disabled, openai, azure, or ollama.",
            llm.provider
        );
    }
    if llm.is_enabled() && llm.model.is_none() {
        anyhow::bail!(
            "llm.model must be specified when provider is '{}'",
            llm.provider
        );
    }
    if llm.provider == "azure" && llm.url.is_none() {
        anyhow::bail!("llm.url (Azure endpoint) is required for provider 'azure'");
    }
    if llm.timeout_secs == 0 {
        anyhow::bail!("llm.timeout_secs must be > 0");
    }

    Ok(())
}
