//! Deterministic providers and a temp-dir environment shared by the
//! integration suites.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use catalog_rag::catalog::Catalog;
use catalog_rag::config::Config;
use catalog_rag::orchestrator::RagOrchestrator;
use catalog_rag::service::{NewProduct, ProductService};
use catalog_rag::sqlite_index::SqliteVectorStore;
use catalog_rag::synthesizer::FILTER_INSTRUCTION;
use catalog_rag::{db, migrate};
use catalog_rag_core::conversation::SUMMARY_INSTRUCTION;
use catalog_rag_core::embedding::Embedder;
use catalog_rag_core::llm::ChatModel;
use catalog_rag_core::models::ChatMessage;
use catalog_rag_core::RagError;

// ─── Fakes ──────────────────────────────────────────────────────────

/// One dimension per vocabulary word, plus a constant bias.
pub struct KeywordEmbedder {
    pub broken: AtomicBool,
}

const VOCABULARY: [&str; 6] = ["gold", "silver", "ring", "watch", "chain", "steel"];

impl KeywordEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            broken: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword"
    }
    fn dims(&self) -> usize {
        VOCABULARY.len() + 1
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RagError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(RagError::Embedding("quota exceeded".into()));
        }
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                let mut v: Vec<f32> = VOCABULARY
                    .iter()
                    .map(|w| if lower.contains(w) { 1.0 } else { 0.0 })
                    .collect();
                v.push(0.1);
                v
            })
            .collect())
    }
}

/// Answers filter requests with a configurable string, summary requests
/// with a numbered summary, and everything else with a numbered reply.
pub struct ScriptedModel {
    pub filter_answer: Mutex<String>,
    pub broken: AtomicBool,
    pub delay: Duration,
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedModel {
    pub fn new(filter_answer: &str) -> Arc<Self> {
        Self::with_delay(filter_answer, Duration::ZERO)
    }

    pub fn with_delay(filter_answer: &str, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            filter_answer: Mutex::new(filter_answer.to_string()),
            broken: AtomicBool::new(false),
            delay,
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn set_filter_answer(&self, answer: &str) {
        *self.filter_answer.lock() = answer.to_string();
    }

    pub fn conversation_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.first().map(|m| m.content.as_str()) != Some(FILTER_INSTRUCTION))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }
    async fn complete(&self, messages: &[ChatMessage]) -> Result<String, RagError> {
        if self.broken.load(Ordering::SeqCst) {
            return Err(RagError::ConversationModel("service unavailable".into()));
        }
        if messages.first().map(|m| m.content.as_str()) == Some(FILTER_INSTRUCTION) {
            return Ok(self.filter_answer.lock().clone());
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let n = {
            let mut requests = self.requests.lock();
            requests.push(messages.to_vec());
            requests.len()
        };
        match messages.last() {
            Some(m) if m.content == SUMMARY_INSTRUCTION => Ok(format!("summary {}", n)),
            _ => Ok(format!("reply {}", n)),
        }
    }
}

// ─── Setup ──────────────────────────────────────────────────────────

pub struct Env {
    pub service: Arc<ProductService>,
    pub model: Arc<ScriptedModel>,
    pub embedder: Arc<KeywordEmbedder>,
    pub config: Config,
    _tmp: TempDir,
}

pub async fn setup_with(model: Arc<ScriptedModel>) -> Env {
    setup_with_timeout(model, 60).await
}

/// Environment whose model calls are bounded by `llm_timeout_secs`.
pub async fn setup_with_timeout(model: Arc<ScriptedModel>, llm_timeout_secs: u64) -> Env {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::minimal(tmp.path().join("catalog.sqlite"));
    config.index.dir = tmp.path().join("index");
    config.llm.timeout_secs = llm_timeout_secs;

    let pool = db::connect(&config).await.unwrap();
    migrate::migrate_catalog(&pool, "products").await.unwrap();
    let catalog = Catalog::open(pool).await.unwrap();

    let index_pool = db::connect_index(&config).await.unwrap();
    migrate::migrate_index(&index_pool).await.unwrap();
    let store = Arc::new(SqliteVectorStore::new(index_pool, "keyword"));

    let embedder = KeywordEmbedder::new();
    let rag = RagOrchestrator::new(store, embedder.clone(), model.clone(), &config);
    let service = Arc::new(ProductService::new(
        Arc::new(catalog),
        Arc::new(rag),
        "products",
    ));

    Env {
        service,
        model,
        embedder,
        config,
        _tmp: tmp,
    }
}

pub async fn setup(filter_answer: &str) -> Env {
    setup_with(ScriptedModel::new(filter_answer)).await
}

pub fn product(name: &str, color: &str, price: f64) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        color: color.to_string(),
        price,
        description: "x".to_string(),
    }
}

pub async fn assert_mirrored(env: &Env) {
    let catalog_ids = env.service.catalog().ids("products").await.unwrap();
    let index_ids = env.service.rag().index().ids().await.unwrap();
    assert_eq!(catalog_ids, index_ids);
    assert!(env.service.audit().await.unwrap().is_consistent());
}
