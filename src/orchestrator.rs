//! RAG orchestrator: the facade over index, retrieval, and conversation.
//!
//! [`RagOrchestrator`] owns the [`VectorIndex`] and the
//! [`ConversationEngine`]'s thread table. Callers keep the catalog and
//! the index in step by invoking [`add_item`](RagOrchestrator::add_item)
//! only after a relational insert has committed, and
//! [`remove_items`](RagOrchestrator::remove_items) after a relational
//! delete. [`ProductService`](crate::service::ProductService) does both.

use std::sync::Arc;

use anyhow::Result;

use catalog_rag_core::embedding::Embedder;
use catalog_rag_core::filter::MetadataFilter;
use catalog_rag_core::llm::ChatModel;
use catalog_rag_core::models::{ProductRecord, Retrieval};
use catalog_rag_core::store::{StoredItem, VectorStore};
use catalog_rag_core::RagError;

use crate::audit::AuditReport;
use crate::config::Config;
use crate::conversation::ConversationEngine;
use crate::db;
use crate::embedding::create_embedder;
use crate::index::VectorIndex;
use crate::llm::create_chat_model;
use crate::retriever::Retriever;
use crate::sqlite_index::SqliteVectorStore;
use crate::synthesizer::FilterSynthesizer;

pub struct RagOrchestrator {
    index: Arc<VectorIndex>,
    retriever: Retriever,
    engine: ConversationEngine,
}

impl RagOrchestrator {
    /// Assemble an orchestrator from explicit parts.
    pub fn new(
        store: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        model: Arc<dyn ChatModel>,
        config: &Config,
    ) -> Self {
        let index = Arc::new(
            VectorIndex::new(store, embedder).with_batch_size(config.embedding.batch_size),
        );
        let synthesizer = FilterSynthesizer::new(model.clone(), config.llm.timeout_secs);
        let retriever = Retriever::new(index.clone(), synthesizer, config.retrieval.top_k);
        let engine = ConversationEngine::new(
            model,
            config.conversation.summary_threshold,
            config.llm.timeout_secs,
        );
        Self {
            index,
            retriever,
            engine,
        }
    }

    /// Open the persisted index and the configured providers.
    pub async fn open(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let model = create_chat_model(&config.llm)?;
        let pool = db::connect_index(config).await?;
        crate::migrate::migrate_index(&pool).await?;
        let store = Arc::new(SqliteVectorStore::new(pool, embedder.model_name()));

        let rag = Self::new(store, embedder, model, config);
        log::info!(
            "opened vector index at {} ({} item(s))",
            config.index.store_path().display(),
            rag.index_len().await?
        );
        Ok(rag)
    }

    /// Mirror a committed catalog row into the index.
    pub async fn add_item(&self, record: &ProductRecord) -> Result<(), RagError> {
        self.index.add(record.to_indexed_item()).await?;
        log::info!("product {} added to the index", record.id);
        Ok(())
    }

    /// Embed the rendering of `record` without mutating the index.
    pub async fn prepare_item(&self, record: &ProductRecord) -> Result<StoredItem, RagError> {
        self.index.prepare(record.to_indexed_item()).await
    }

    /// Replace the indexed item for a committed catalog update.
    pub async fn commit_item(&self, stored: StoredItem) -> Result<(), RagError> {
        let id = stored.item.id;
        self.index.upsert(stored).await?;
        log::info!("product {} re-indexed", id);
        Ok(())
    }

    /// Remove every indexed item matching `filter`. Empty filters remove nothing.
    pub async fn remove_items(&self, filter: &MetadataFilter) -> Result<Vec<i64>, RagError> {
        self.index.remove_where(filter).await
    }

    pub async fn retrieve(&self, query: &str) -> Result<Retrieval, RagError> {
        self.retriever.retrieve(query).await
    }

    /// Answer `query` on `thread_id`, grounding the turn on retrieved items.
    pub async fn answer(&self, query: &str, thread_id: &str) -> Result<String, RagError> {
        let retrieval = self.retrieve(query).await?;
        let prompt = compose_prompt(&retrieval.texts, query);
        self.engine.turn(thread_id, &prompt).await
    }

    pub async fn audit(&self, catalog_ids: &[i64]) -> Result<AuditReport, RagError> {
        let index_ids = self.index.ids().await?;
        Ok(AuditReport::compare(catalog_ids, &index_ids))
    }

    /// Rebuild the index from the full catalog.
    pub async fn heal(&self, records: &[ProductRecord]) -> Result<usize, RagError> {
        let items = records.iter().map(ProductRecord::to_indexed_item).collect();
        self.index.rebuild(items).await
    }

    pub async fn index_len(&self) -> Result<usize, RagError> {
        self.index.len().await
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn engine(&self) -> &ConversationEngine {
        &self.engine
    }
}

/// The human message of an answer turn.
pub fn compose_prompt(texts: &[String], query: &str) -> String {
    format!(
        "Base de datos a usar para la respuesta: {}, Pregunta: {}",
        render_list(texts),
        query
    )
}

/// Render texts as a bracketed list of quoted strings: `['a', 'b']`.
///
/// Strings containing a single quote but no double quote are wrapped in
/// double quotes instead; otherwise quotes and backslashes are escaped.
fn render_list(texts: &[String]) -> String {
    let items: Vec<String> = texts.iter().map(|t| quote(t)).collect();
    format!("[{}]", items.join(", "))
}

fn quote(text: &str) -> String {
    let delimiter = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(text.len() + 2);
    out.push(delimiter);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}
