//! Product operations that keep the catalog and the index mirrored.
//!
//! Every write touches the relational table first and the index second,
//! under one lock, so no other write can observe or interleave with the
//! gap between the two. If the index step fails after a relational write,
//! the write is undone and the error is returned.

use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use thiserror::Error;

use catalog_rag_core::filter::{MetadataFilter, FILTERABLE_KEYS};
use catalog_rag_core::models::{ProductRecord, Retrieval};
use catalog_rag_core::RagError;

use crate::audit::AuditReport;
use crate::catalog::{Catalog, CatalogError, Row};
use crate::config::Config;
use crate::orchestrator::RagOrchestrator;
use crate::{db, migrate};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error(transparent)]
    Rag(#[from] RagError),

    #[error("product {0} not found")]
    NotFound(i64),

    #[error("invalid request: {0}")]
    Invalid(String),
}

/// Fields of a product to create. The id is generated.
#[derive(Debug, Clone, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub color: String,
    pub price: f64,
    #[serde(default)]
    pub description: String,
}

impl NewProduct {
    fn to_row(&self) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), self.name.clone().into());
        row.insert("color".into(), self.color.clone().into());
        row.insert("price".into(), self.price.into());
        row.insert("description".into(), self.description.clone().into());
        row
    }
}

pub struct ProductService {
    catalog: Arc<Catalog>,
    rag: Arc<RagOrchestrator>,
    table: String,
    write_lock: tokio::sync::Mutex<()>,
}

impl ProductService {
    pub fn new(catalog: Arc<Catalog>, rag: Arc<RagOrchestrator>, table: impl Into<String>) -> Self {
        Self {
            catalog,
            rag,
            table: table.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Open the catalog and the index described by `config`.
    ///
    /// Both schemas are created if missing.
    pub async fn open(config: &Config) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::migrate_catalog(&pool, &config.index.table).await?;
        let catalog = Catalog::open(pool)
            .await
            .context("Failed to introspect catalog schema")?;
        catalog
            .registry()
            .table(&config.index.table)
            .context("Mirrored table is missing from the catalog")?;
        let rag = RagOrchestrator::open(config).await?;
        Ok(Self::new(
            Arc::new(catalog),
            Arc::new(rag),
            config.index.table.clone(),
        ))
    }

    pub fn rag(&self) -> &Arc<RagOrchestrator> {
        &self.rag
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Insert a product and mirror it into the index.
    pub async fn create_product(&self, product: &NewProduct) -> Result<ProductRecord, ServiceError> {
        validate(&product.name, product.price)?;

        let _guard = self.write_lock.lock().await;
        let id = self
            .catalog
            .insert_with_generated_id(&self.table, &product.to_row())
            .await?;
        let record = ProductRecord {
            id,
            name: product.name.clone(),
            color: product.color.clone(),
            price: product.price,
            description: product.description.clone(),
        };

        if let Err(e) = self.rag.add_item(&record).await {
            log::warn!("indexing product {} failed, rolling back insert: {}", id, e);
            self.catalog.delete_where(&self.table, &id_row(id)).await?;
            return Err(e.into());
        }
        Ok(record)
    }

    /// Delete products matching `filter` from the catalog, then from the index.
    ///
    /// Only `id`, `color` and `price` may be used, and the filter must not be empty.
    pub async fn delete_products(&self, filter: &MetadataFilter) -> Result<Vec<i64>, ServiceError> {
        if filter.is_empty() {
            return Err(ServiceError::Invalid(
                "an empty filter would delete every product".into(),
            ));
        }
        if let Some((key, _)) = filter
            .iter()
            .find(|(k, _)| !FILTERABLE_KEYS.contains(&k.as_str()))
        {
            return Err(ServiceError::Invalid(format!(
                "cannot filter on '{}'; use one of {:?}",
                key, FILTERABLE_KEYS
            )));
        }

        let row: Row = filter
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();

        let _guard = self.write_lock.lock().await;
        let deleted = self.catalog.delete_where(&self.table, &row).await?;
        let removed = self.rag.remove_items(filter).await?;
        if removed != deleted {
            log::warn!(
                "catalog deleted {:?} but index removed {:?}; run `crag index audit`",
                deleted,
                removed
            );
        }
        Ok(deleted)
    }

    /// Update one product and re-index it.
    ///
    /// The merged row is validated and embedded before anything is written.
    /// If re-indexing fails after the relational update, the changed
    /// columns are restored and the error is returned.
    pub async fn update_product(&self, id: i64, changes: &Row) -> Result<ProductRecord, ServiceError> {
        if changes.contains_key("id") {
            return Err(ServiceError::Invalid("the id of a product cannot change".into()));
        }
        if changes.is_empty() {
            return Err(ServiceError::Invalid("no columns to update".into()));
        }
        self.catalog
            .registry()
            .table(&self.table)?
            .check_columns(changes.keys())?;

        let _guard = self.write_lock.lock().await;
        let current = self
            .catalog
            .select_where(&self.table, &id_row(id))
            .await?
            .into_iter()
            .next()
            .ok_or(ServiceError::NotFound(id))?;

        let mut merged = current.clone();
        merged.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
        let record = ProductRecord::try_from(&merged)
            .map_err(|e| ServiceError::Invalid(e.to_string()))?;
        validate(&record.name, record.price)?;

        let stored = self.rag.prepare_item(&record).await?;
        let updated = self
            .catalog
            .update_where(&self.table, &id_row(id), changes)
            .await?;
        if updated == 0 {
            return Err(ServiceError::NotFound(id));
        }

        if let Err(e) = self.rag.commit_item(stored).await {
            log::warn!("re-indexing product {} failed, restoring row: {}", id, e);
            let original: Row = changes
                .keys()
                .map(|k| (k.clone(), current.get(k).cloned().unwrap_or_default()))
                .collect();
            self.catalog
                .update_where(&self.table, &id_row(id), &original)
                .await?;
            return Err(e.into());
        }
        Ok(record)
    }

    pub async fn get_product(&self, id: i64) -> Result<ProductRecord, ServiceError> {
        self.fetch(id).await?.ok_or(ServiceError::NotFound(id))
    }

    pub async fn list_products(&self) -> Result<Vec<ProductRecord>, ServiceError> {
        let rows = self.catalog.select_all(&self.table).await?;
        rows.iter()
            .map(|r| ProductRecord::try_from(r).map_err(ServiceError::from))
            .collect()
    }

    pub async fn search(&self, query: &str) -> Result<Retrieval, ServiceError> {
        Ok(self.rag.retrieve(query).await?)
    }

    pub async fn chat(&self, text: &str, thread_id: &str) -> Result<String, ServiceError> {
        Ok(self.rag.answer(text, thread_id).await?)
    }

    /// Compare catalog ids with indexed ids.
    pub async fn audit(&self) -> Result<AuditReport, ServiceError> {
        let ids = self.catalog.ids(&self.table).await?;
        Ok(self.rag.audit(&ids).await?)
    }

    /// Rebuild the index from the whole catalog.
    pub async fn rebuild_index(&self) -> Result<usize, ServiceError> {
        let _guard = self.write_lock.lock().await;
        let records = self.list_products().await?;
        Ok(self.rag.heal(&records).await?)
    }

    async fn fetch(&self, id: i64) -> Result<Option<ProductRecord>, ServiceError> {
        let rows = self.catalog.select_where(&self.table, &id_row(id)).await?;
        rows.first()
            .map(|r| ProductRecord::try_from(r).map_err(ServiceError::from))
            .transpose()
    }
}

fn validate(name: &str, price: f64) -> Result<(), ServiceError> {
    if name.trim().is_empty() {
        return Err(ServiceError::Invalid("name must not be empty".into()));
    }
    if !price.is_finite() {
        return Err(ServiceError::Invalid("price must be a finite number".into()));
    }
    Ok(())
}

fn id_row(id: i64) -> Row {
    let mut row = Row::new();
    row.insert("id".into(), id.into());
    row
}
