//! Vector index service.
//!
//! [`VectorIndex`] pairs a [`VectorStore`] with an [`Embedder`]. Embedding
//! calls happen before the write lock is taken, so a slow provider never
//! blocks readers or other writers. Mutations (`add`, `remove_where`,
//! `rebuild`) serialize on one process-wide async mutex.

use std::sync::Arc;

use catalog_rag_core::embedding::{content_hash, Embedder};
use catalog_rag_core::filter::MetadataFilter;
use catalog_rag_core::models::{IndexedItem, SearchHit};
use catalog_rag_core::store::{StoredItem, VectorStore};
use catalog_rag_core::RagError;

pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    write_lock: tokio::sync::Mutex<()>,
    batch_size: usize,
}

impl VectorIndex {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            store,
            embedder,
            write_lock: tokio::sync::Mutex::new(()),
            batch_size: 64,
        }
    }

    /// Texts per embedding request during [`rebuild`](Self::rebuild).
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Embed `item.text` and store it.
    ///
    /// Fails with [`RagError::DuplicateItem`] if `item.id` is already indexed.
    pub async fn add(&self, item: IndexedItem) -> Result<(), RagError> {
        if self.store.contains(item.id).await? {
            return Err(RagError::DuplicateItem(item.id));
        }

        let stored = self.prepare(item).await?;
        let _guard = self.write_lock.lock().await;
        let id = stored.item.id;
        self.store.insert(stored).await?;
        log::debug!("indexed item {}", id);
        Ok(())
    }

    /// Embed `item.text` without touching the store.
    ///
    /// Lets a caller fail on the embedder before it mutates anything else.
    pub async fn prepare(&self, item: IndexedItem) -> Result<StoredItem, RagError> {
        let vector = self.embedder.embed_one(&item.text).await?;
        Ok(StoredItem {
            content_hash: content_hash(&item.text),
            item,
            vector,
        })
    }

    /// Store an already embedded item, replacing any item with its id.
    pub async fn upsert(&self, stored: StoredItem) -> Result<(), RagError> {
        let _guard = self.write_lock.lock().await;
        let id = stored.item.id;
        self.store.upsert(stored).await?;
        log::debug!("re-indexed item {}", id);
        Ok(())
    }

    /// Delete every item whose metadata satisfies all pairs of `filter`.
    ///
    /// An empty filter deletes nothing. Returns the removed ids.
    pub async fn remove_where(&self, filter: &MetadataFilter) -> Result<Vec<i64>, RagError> {
        if filter.is_empty() {
            log::debug!("remove_where with empty filter: nothing removed");
            return Ok(Vec::new());
        }

        let _guard = self.write_lock.lock().await;
        let removed = self.store.delete_where(filter).await?;
        log::info!("removed {} item(s) matching {}", removed.len(), filter);
        Ok(removed)
    }

    /// Up to `k` items nearest to `query`, constrained by `filter`.
    ///
    /// `k` is capped at the index size. An empty index or `k == 0` returns
    /// no hits without calling the embedder.
    pub async fn search(
        &self,
        query: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, RagError> {
        let size = self.store.len().await?;
        let k = k.min(size);
        if k == 0 {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed_one(query).await?;
        self.store.query(&vector, k, filter).await
    }

    pub async fn len(&self) -> Result<usize, RagError> {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> Result<bool, RagError> {
        Ok(self.store.len().await? == 0)
    }

    pub async fn ids(&self) -> Result<Vec<i64>, RagError> {
        self.store.ids().await
    }

    /// Replace the whole index with `items`, re-embedding in batches.
    ///
    /// Items whose text is unchanged reuse their stored vector. The swap
    /// happens only after every batch embedded successfully.
    pub async fn rebuild(&self, items: Vec<IndexedItem>) -> Result<usize, RagError> {
        let mut seen = std::collections::BTreeSet::new();
        for item in &items {
            if !seen.insert(item.id) {
                return Err(RagError::DuplicateItem(item.id));
            }
        }

        let existing: std::collections::HashMap<String, Vec<f32>> = self
            .store
            .items()
            .await?
            .into_iter()
            .map(|s| (s.content_hash, s.vector))
            .collect();

        let mut stored = Vec::with_capacity(items.len());
        let mut pending: Vec<(IndexedItem, String)> = Vec::new();
        for item in items {
            let hash = content_hash(&item.text);
            match existing.get(&hash) {
                Some(vector) => stored.push(StoredItem {
                    item,
                    vector: vector.clone(),
                    content_hash: hash,
                }),
                None => pending.push((item, hash)),
            }
        }

        let reused = stored.len();
        for batch in pending.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(item, _)| item.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await?;
            if vectors.len() != batch.len() {
                return Err(RagError::Embedding(format!(
                    "expected {} vectors, got {}",
                    batch.len(),
                    vectors.len()
                )));
            }
            for ((item, hash), vector) in batch.iter().cloned().zip(vectors) {
                stored.push(StoredItem {
                    item,
                    vector,
                    content_hash: hash,
                });
            }
        }
        stored.sort_by_key(|s| s.item.id);

        let count = stored.len();
        let _guard = self.write_lock.lock().await;
        self.store.replace_all(stored).await?;
        log::info!(
            "rebuilt index: {} item(s), {} embedded, {} reused",
            count,
            count - reused,
            reused
        );
        Ok(count)
    }
}
