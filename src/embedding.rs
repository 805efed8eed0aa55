//! Embedding provider implementations.
//!
//! Concrete [`Embedder`] backends:
//! - **[`DisabledEmbedder`]**: returns errors; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]**: `POST https://api.openai.com/v1/embeddings`.
//! - **[`AzureEmbedder`]**: Azure OpenAI deployment embeddings endpoint.
//! - **[`OllamaEmbedder`]**: a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`**: fastembed in-process inference (feature `local-embeddings`).
//!
//! HTTP providers share the retry policy in [`crate::http`]. Every failure
//! surfaces as [`RagError::Embedding`], which callers treat as transient.
//!
//! # Provider Selection
//!
//! ```rust
//! # use catalog_rag::config::EmbeddingConfig;
//! # use catalog_rag::embedding::create_embedder;
//! let config = EmbeddingConfig::default(); // provider = "disabled"
//! let embedder = create_embedder(&config).unwrap();
//! assert_eq!(embedder.model_name(), "disabled");
//! ```

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use catalog_rag_core::embedding::Embedder;
use catalog_rag_core::RagError;

use crate::config::EmbeddingConfig;
use crate::http;

// ============ Disabled Provider ============

/// A no-op embedder that always returns errors.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        Err(RagError::Embedding(
            "embedding provider is disabled; set [embedding] provider in config".to_string(),
        ))
    }
}

// ============ OpenAI Provider ============

/// Embedder using the OpenAI API. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            model,
            dims,
            api_key,
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = http::post_json_with_retry(
            || {
                self.client
                    .post("https://api.openai.com/v1/embeddings")
                    .bearer_auth(&self.api_key)
            },
            &body,
            self.max_retries,
            "OpenAI embeddings API",
        )
        .await
        .map_err(|e| RagError::Embedding(e.to_string()))?;
        parse_data_embeddings(&json, texts.len())
    }
}

// ============ Azure OpenAI Provider ============

/// Embedder using an Azure OpenAI deployment.
///
/// `model` is the deployment name. The key is read from
/// `EMB_OPENAI_API_KEY`, falling back to `AZURE_OPENAI_API_KEY`.
pub struct AzureEmbedder {
    deployment: String,
    dims: usize,
    endpoint: String,
    api_version: String,
    api_key: String,
    client: reqwest::Client,
    max_retries: u32,
}

pub const DEFAULT_AZURE_API_VERSION: &str = "2024-02-01";

impl AzureEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (deployment, dims) = model_and_dims(config)?;
        let endpoint = config
            .url
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.url required for Azure provider"))?;
        let api_key = std::env::var("EMB_OPENAI_API_KEY")
            .or_else(|_| std::env::var("AZURE_OPENAI_API_KEY"))
            .map_err(|_| {
                anyhow::anyhow!("EMB_OPENAI_API_KEY or AZURE_OPENAI_API_KEY must be set")
            })?;

        Ok(Self {
            deployment,
            dims,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_version: config
                .api_version
                .clone()
                .unwrap_or_else(|| DEFAULT_AZURE_API_VERSION.to_string()),
            api_key,
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for AzureEmbedder {
    fn model_name(&self) -> &str {
        &self.deployment
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let url = format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment, self.api_version
        );
        let body = serde_json::json!({ "input": texts });
        let json = http::post_json_with_retry(
            || self.client.post(&url).header("api-key", &self.api_key),
            &body,
            self.max_retries,
            "Azure OpenAI embeddings API",
        )
        .await
        .map_err(|e| RagError::Embedding(e.to_string()))?;
        parse_data_embeddings(&json, texts.len())
    }
}

// ============ Ollama Provider ============

/// Embedder using a local Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    model: String,
    dims: usize,
    url: String,
    client: reqwest::Client,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model, dims) = model_and_dims(config)?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| "http://localhost:11434".to_string());

        Ok(Self {
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            client: http::client(config.timeout_secs)?,
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let endpoint = format!("{}/api/embed", self.url);
        let body = serde_json::json!({ "model": self.model, "input": texts });
        let json = http::post_json_with_retry(
            || self.client.post(&endpoint),
            &body,
            self.max_retries,
            "Ollama embed API",
        )
        .await
        .map_err(|e| RagError::Embedding(format!("{} (is Ollama running at {}?)", e, self.url)))?;
        parse_ollama_embeddings(&json, texts.len())
    }
}

// ============ Local Provider (fastembed) ============

/// In-process embedder backed by fastembed.
///
/// The model is downloaded on first use and kept loaded for the life of
/// the embedder.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "multilingual-e5-small".to_string());
        // Validate the name up front so misconfiguration fails at startup.
        fastembed_model(&model_name)?;
        let dims = config.dims.unwrap_or(match model_name.as_str() {
            "bge-base-en-v1.5" | "multilingual-e5-base" => 768,
            "multilingual-e5-large" => 1024,
            _ => 384,
        });
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(None)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!("Unknown local embedding model: '{}'", other),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        let slot = self.model.clone();
        let name = self.model_name.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || -> Result<Vec<Vec<f32>>, RagError> {
            let mut guard = slot
                .lock()
                .map_err(|_| RagError::Embedding("local model lock poisoned".to_string()))?;
            if guard.is_none() {
                let model = fastembed_model(&name).map_err(|e| RagError::Embedding(e.to_string()))?;
                let loaded = fastembed::TextEmbedding::try_new(fastembed::InitOptions::new(model))
                    .map_err(|e| {
                        RagError::Embedding(format!("failed to initialize local model: {}", e))
                    })?;
                *guard = Some(loaded);
            }
            let model = guard
                .as_mut()
                .ok_or_else(|| RagError::Embedding("local model not loaded".to_string()))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| RagError::Embedding(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| RagError::Embedding(format!("local embedding task failed: {}", e)))?
    }
}

// ============ Response parsing ============

fn model_and_dims(config: &EmbeddingConfig) -> Result<(String, usize)> {
    let model = config
        .model
        .clone()
        .ok_or_else(|| anyhow::anyhow!("embedding.model required for {} provider", config.provider))?;
    let dims = config
        .dims
        .ok_or_else(|| anyhow::anyhow!("embedding.dims required for {} provider", config.provider))?;
    Ok((model, dims))
}

/// Parse an OpenAI-shaped response: `data[].embedding`, ordered by `index`.
fn parse_data_embeddings(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, RagError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::Embedding("invalid response: missing data array".to_string()))?;

    let mut indexed: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| RagError::Embedding("invalid response: missing embedding".to_string()))?;
        indexed.push((index, to_f32_vec(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);

    let embeddings: Vec<Vec<f32>> = indexed.into_iter().map(|(_, v)| v).collect();
    check_count(embeddings, expected)
}

fn parse_ollama_embeddings(
    json: &serde_json::Value,
    expected: usize,
) -> Result<Vec<Vec<f32>>, RagError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| {
            RagError::Embedding("invalid Ollama response: missing embeddings array".to_string())
        })?;

    let mut result = Vec::with_capacity(embeddings.len());
    for embedding in embeddings {
        let values = embedding.as_array().ok_or_else(|| {
            RagError::Embedding("invalid Ollama response: embedding is not an array".to_string())
        })?;
        result.push(to_f32_vec(values));
    }
    check_count(result, expected)
}

fn to_f32_vec(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

fn check_count(embeddings: Vec<Vec<f32>>, expected: usize) -> Result<Vec<Vec<f32>>, RagError> {
    if embeddings.len() != expected {
        return Err(RagError::Embedding(format!(
            "expected {} embeddings, got {}",
            expected,
            embeddings.len()
        )));
    }
    Ok(embeddings)
}

/// Create the configured [`Embedder`].
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"azure"` | [`AzureEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings`) |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "azure" => Ok(Arc::new(AzureEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_data_embeddings_orders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] }
            ]
        });
        let v = parse_data_embeddings(&json, 2).unwrap();
        assert_eq!(v, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
    }

    #[test]
    fn test_parse_data_embeddings_count_mismatch() {
        let json = serde_json::json!({ "data": [ { "embedding": [1.0] } ] });
        assert!(matches!(
            parse_data_embeddings(&json, 2),
            Err(RagError::Embedding(_))
        ));
    }

    #[test]
    fn test_parse_ollama_embeddings() {
        let json = serde_json::json!({ "embeddings": [[0.5, 0.25]] });
        assert_eq!(
            parse_ollama_embeddings(&json, 1).unwrap(),
            vec![vec![0.5, 0.25]]
        );
        assert!(parse_ollama_embeddings(&serde_json::json!({}), 1).is_err());
    }

    #[tokio::test]
    async fn test_disabled_embedder_errors_transiently() {
        let err = DisabledEmbedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(err.is_transient());
    }
}
