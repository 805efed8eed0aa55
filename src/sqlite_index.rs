//! SQLite-backed [`VectorStore`] implementation.
//!
//! Items live in the `index_items` table of `{index.dir}/vectors.sqlite`.
//! Every mutation is a single transaction, so the on-disk index is the
//! persisted index: there is no separate flush step and nothing is lost
//! between mutations. Vectors are stored as little-endian `f32` BLOBs.
//!
//! Metadata filters are evaluated in Rust over decoded `metadata_json`,
//! which keeps numeric comparison (`100 == 100.0`) identical to the
//! in-memory store.

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use catalog_rag_core::embedding::{blob_to_vec, vec_to_blob};
use catalog_rag_core::filter::MetadataFilter;
use catalog_rag_core::models::{IndexedItem, Metadata, SearchHit};
use catalog_rag_core::store::{rank_candidates, StoredItem, VectorStore};
use catalog_rag_core::RagError;

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteVectorStore {
    pool: SqlitePool,
    /// Embedding model recorded with each stored vector.
    model: String,
}

impl SqliteVectorStore {
    pub fn new(pool: SqlitePool, model: impl Into<String>) -> Self {
        Self {
            pool,
            model: model.into(),
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn load_all(&self) -> Result<Vec<StoredItem>, RagError> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, vector, content_hash FROM index_items ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.iter().map(decode_row).collect()
    }
}

fn store_err(e: sqlx::Error) -> RagError {
    RagError::Store(e.to_string())
}

fn decode_row(row: &SqliteRow) -> Result<StoredItem, RagError> {
    let metadata_json: String = row.get("metadata_json");
    let metadata: Metadata = serde_json::from_str(&metadata_json)?;
    let blob: Vec<u8> = row.get("vector");
    Ok(StoredItem {
        item: IndexedItem {
            id: row.get("id"),
            text: row.get("text"),
            metadata,
        },
        vector: blob_to_vec(&blob),
        content_hash: row.get("content_hash"),
    })
}

async fn insert_row<'e, E>(executor: E, stored: &StoredItem, model: &str) -> Result<(), RagError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let metadata_json = serde_json::to_string(&stored.item.metadata)?;
    sqlx::query(
        r#"
        INSERT INTO index_items (id, text, metadata_json, vector, model, dims, content_hash, indexed_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(stored.item.id)
    .bind(&stored.item.text)
    .bind(&metadata_json)
    .bind(vec_to_blob(&stored.vector))
    .bind(model)
    .bind(stored.vector.len() as i64)
    .bind(&stored.content_hash)
    .bind(chrono::Utc::now().timestamp())
    .execute(executor)
    .await
    .map_err(store_err)?;
    Ok(())
}

#[async_trait]
impl VectorStore for SqliteVectorStore {
    async fn insert(&self, stored: StoredItem) -> Result<(), RagError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;

        let exists: bool = sqlx::query_scalar("SELECT COUNT(*) > 0 FROM index_items WHERE id = ?")
            .bind(stored.item.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(store_err)?;
        if exists {
            return Err(RagError::DuplicateItem(stored.item.id));
        }

        insert_row(&mut *tx, &stored, &self.model).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn upsert(&self, stored: StoredItem) -> Result<(), RagError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query("DELETE FROM index_items WHERE id = ?")
            .bind(stored.item.id)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        insert_row(&mut *tx, &stored, &self.model).await?;
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn delete_where(&self, filter: &MetadataFilter) -> Result<Vec<i64>, RagError> {
        if filter.is_empty() {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let rows = sqlx::query("SELECT id, metadata_json FROM index_items")
            .fetch_all(&mut *tx)
            .await
            .map_err(store_err)?;

        let mut doomed = Vec::new();
        for row in &rows {
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)?;
            if filter.selects_for_removal(&metadata) {
                doomed.push(row.get::<i64, _>("id"));
            }
        }

        for id in &doomed {
            sqlx::query("DELETE FROM index_items WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;

        doomed.sort_unstable();
        Ok(doomed)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<SearchHit>, RagError> {
        let items = self.load_all().await?;
        Ok(rank_candidates(vector, k, filter, items.iter()))
    }

    async fn replace_all(&self, items: Vec<StoredItem>) -> Result<(), RagError> {
        let mut tx = self.pool.begin().await.map_err(store_err)?;
        sqlx::query("DELETE FROM index_items")
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        for stored in &items {
            insert_row(&mut *tx, stored, &self.model)
                .await
                .map_err(|e| match e {
                    RagError::Store(msg) if msg.contains("UNIQUE") => {
                        RagError::DuplicateItem(stored.item.id)
                    }
                    other => other,
                })?;
        }
        tx.commit().await.map_err(store_err)?;
        Ok(())
    }

    async fn items(&self) -> Result<Vec<StoredItem>, RagError> {
        self.load_all().await
    }

    async fn ids(&self) -> Result<Vec<i64>, RagError> {
        sqlx::query_scalar("SELECT id FROM index_items ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn contains(&self, id: i64) -> Result<bool, RagError> {
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM index_items WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)
    }

    async fn len(&self) -> Result<usize, RagError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM index_items")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        Ok(count as usize)
    }
}
