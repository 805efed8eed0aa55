//! In-memory [`VectorStore`] implementation for testing and ephemeral use.
//!
//! Uses a `BTreeMap` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity over all stored vectors.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::RagError;
use crate::filter::MetadataFilter;
use crate::models::SearchHit;

use super::{rank_candidates, StoredItem, VectorStore};

/// In-memory vector store.
pub struct InMemoryVectorStore {
    items: RwLock<BTreeMap<i64, StoredItem>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self {
            items: RwLock::new(BTreeMap::new()),
        }
    }

    fn poisoned() -> RagError {
        RagError::Store("in-memory store lock poisoned".to_string())
    }
}

impl Default for InMemoryVectorStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn insert(&self, stored: StoredItem) -> Result<(), RagError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        if items.contains_key(&stored.item.id) {
            return Err(RagError::DuplicateItem(stored.item.id));
        }
        items.insert(stored.item.id, stored);
        Ok(())
    }

    async fn upsert(&self, stored: StoredItem) -> Result<(), RagError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        items.insert(stored.item.id, stored);
        Ok(())
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<Vec<i64>, RagError> {
        let mut items = self.items.write().map_err(|_| Self::poisoned())?;
        let doomed: Vec<i64> = items
            .values()
            .filter(|s| filter.selects_for_removal(&s.item.metadata))
            .map(|s| s.item.id)
            .collect();
        for id in &doomed {
            items.remove(id);
        }
        Ok(doomed)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, RagError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        Ok(rank_candidates(vector, k, filter, items.values()))
    }

    async fn replace_all(&self, new_items: Vec<StoredItem>) -> Result<(), RagError> {
        let mut map = BTreeMap::new();
        for stored in new_items {
            if map.contains_key(&stored.item.id) {
                return Err(RagError::DuplicateItem(stored.item.id));
            }
            map.insert(stored.item.id, stored);
        }
        *self.items.write().map_err(|_| Self::poisoned())? = map;
        Ok(())
    }

    async fn items(&self) -> Result<Vec<StoredItem>, RagError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        Ok(items.values().cloned().collect())
    }

    async fn ids(&self) -> Result<Vec<i64>, RagError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        Ok(items.keys().copied().collect())
    }

    async fn contains(&self, id: i64) -> Result<bool, RagError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        Ok(items.contains_key(&id))
    }

    async fn len(&self) -> Result<usize, RagError> {
        let items = self.items.read().map_err(|_| Self::poisoned())?;
        Ok(items.len())
    }
}
