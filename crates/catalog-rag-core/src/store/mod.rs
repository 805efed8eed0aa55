//! Vector store abstraction for catalog-rag.
//!
//! The [`VectorStore`] trait holds `(vector, text, metadata)` triples keyed
//! by catalog id, enabling pluggable backends (SQLite on disk, in-memory
//! for tests). Unlike an index that must be rebuilt to forget items,
//! every backend supports native deletion by metadata filter, so removing
//! items never re-embeds the ones that remain.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::RagError;
use crate::filter::MetadataFilter;
use crate::models::{IndexedItem, SearchHit};

/// A stored item together with its vector.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub item: IndexedItem,
    pub vector: Vec<f32>,
    pub content_hash: String,
}

/// Abstract storage backend for the vector index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorStore::insert) | Store one item with its vector |
/// | [`upsert`](VectorStore::upsert) | Store one item, replacing any item with the same id |
/// | [`delete_where`](VectorStore::delete_where) | Delete items whose metadata matches a filter |
/// | [`query`](VectorStore::query) | Filtered cosine-similarity search |
/// | [`replace_all`](VectorStore::replace_all) | Swap the whole content atomically |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Store `item`. Fails with [`RagError::DuplicateItem`] if the id exists.
    async fn insert(&self, stored: StoredItem) -> Result<(), RagError>;

    /// Store `item`, replacing the item with the same id in one step.
    ///
    /// Readers see either the old item or the new one, never neither.
    async fn upsert(&self, stored: StoredItem) -> Result<(), RagError>;

    /// Delete every item selected by `filter` and return their ids.
    ///
    /// Uses removal semantics: an empty filter deletes nothing.
    async fn delete_where(&self, filter: &MetadataFilter) -> Result<Vec<i64>, RagError>;

    /// Up to `k` items most similar to `vector`, optionally filtered.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, RagError>;

    /// Replace the entire content with `items`.
    async fn replace_all(&self, items: Vec<StoredItem>) -> Result<(), RagError>;

    /// All stored items with their vectors, ordered by id.
    async fn items(&self) -> Result<Vec<StoredItem>, RagError>;

    /// All stored ids, ascending.
    async fn ids(&self) -> Result<Vec<i64>, RagError>;

    async fn contains(&self, id: i64) -> Result<bool, RagError>;

    async fn len(&self) -> Result<usize, RagError>;
}

/// Rank `candidates` against `vector` and keep the best `k`.
///
/// Sort: score descending, then id ascending for determinism. Shared by
/// backends that evaluate similarity in process.
pub fn rank_candidates<'a>(
    vector: &[f32],
    k: usize,
    filter: Option<&MetadataFilter>,
    candidates: impl Iterator<Item = &'a StoredItem>,
) -> Vec<SearchHit> {
    let mut hits: Vec<SearchHit> = candidates
        .filter(|s| filter.map_or(true, |f| f.matches(&s.item.metadata)))
        .map(|s| SearchHit {
            id: s.item.id,
            text: s.item.text.clone(),
            score: cosine_similarity(vector, &s.vector) as f64,
        })
        .collect();
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.id.cmp(&b.id))
    });
    hits.truncate(k);
    hits
}
