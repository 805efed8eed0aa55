//! Relational catalog access over generic rows.
//!
//! Tables are not modeled as Rust types. A [`SchemaRegistry`] is built
//! once at startup by introspecting SQLite (`sqlite_master` and
//! `PRAGMA table_info`), and every operation works on [`Row`] values:
//! column name to `serde_json::Value`.
//!
//! Table and column names are checked against the registry before they
//! are interpolated into SQL. Values are always bound.
//!
//! # Operations
//!
//! | Method | SQL |
//! |--------|-----|
//! | [`insert_with_generated_id`](Catalog::insert_with_generated_id) | `INSERT` with `id = MAX(id) + 1` |
//! | [`select_where`](Catalog::select_where) | `SELECT * ... WHERE a = ? AND b = ?` |
//! | [`update_where`](Catalog::update_where) | `UPDATE ... SET ... WHERE ...` |
//! | [`delete_where`](Catalog::delete_where) | `DELETE ... WHERE ...`, returning the deleted ids |

use std::collections::BTreeMap;

use serde::Serialize;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column, Row as _, Sqlite, SqlitePool, TypeInfo, ValueRef};
use thiserror::Error;

pub use catalog_rag_core::models::Row;

/// Columns stamped with the current time on insert / update when present.
const CREATE_DATE: &str = "create_date";
const UPDATE_DATE: &str = "update_date";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("unknown table '{0}'")]
    UnknownTable(String),

    #[error("unknown column '{column}' in table '{table}'")]
    UnknownColumn { table: String, column: String },

    #[error("invalid catalog request: {0}")]
    Invalid(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnInfo {
    pub name: String,
    /// Declared SQLite type, e.g. `TEXT` or `REAL`.
    pub decl_type: String,
    pub primary_key: bool,
    pub not_null: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    pub fn check_columns<'a>(
        &self,
        names: impl IntoIterator<Item = &'a String>,
    ) -> Result<(), CatalogError> {
        for name in names {
            if !self.has_column(name) {
                return Err(CatalogError::UnknownColumn {
                    table: self.name.clone(),
                    column: name.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Table schemas discovered at startup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    tables: BTreeMap<String, TableSchema>,
}

impl SchemaRegistry {
    pub async fn introspect(pool: &SqlitePool) -> Result<Self, CatalogError> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'table' \
             AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx_%' ORDER BY name",
        )
        .fetch_all(pool)
        .await?;

        let mut tables = BTreeMap::new();
        for name in names {
            // Identifiers are double-quoted in generated SQL.
            if name.contains('"') {
                continue;
            }
            let rows = sqlx::query(&format!("PRAGMA table_info(\"{}\")", name))
                .fetch_all(pool)
                .await?;
            let columns = rows
                .iter()
                .map(|r| ColumnInfo {
                    name: r.get("name"),
                    decl_type: r.get("type"),
                    primary_key: r.get::<i64, _>("pk") > 0,
                    not_null: r.get::<i64, _>("notnull") != 0,
                })
                .collect();
            tables.insert(name.clone(), TableSchema { name, columns });
        }

        log::debug!("schema registry: {} table(s)", tables.len());
        Ok(Self { tables })
    }

    pub fn table(&self, name: &str) -> Result<&TableSchema, CatalogError> {
        self.tables
            .get(name)
            .ok_or_else(|| CatalogError::UnknownTable(name.to_string()))
    }

    pub fn tables(&self) -> Vec<&str> {
        self.tables.keys().map(String::as_str).collect()
    }
}

/// Generic data access over the catalog database.
pub struct Catalog {
    pool: SqlitePool,
    registry: SchemaRegistry,
}

impl Catalog {
    /// Introspect the schema of `pool` and wrap it.
    pub async fn open(pool: SqlitePool) -> Result<Self, CatalogError> {
        let registry = SchemaRegistry::introspect(&pool).await?;
        Ok(Self { pool, registry })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.registry
    }

    pub fn tables(&self) -> Vec<&str> {
        self.registry.tables()
    }

    pub fn columns(&self, table: &str) -> Result<&[ColumnInfo], CatalogError> {
        Ok(&self.registry.table(table)?.columns)
    }

    /// Insert `row` with `id = MAX(id) + 1` and return the new id.
    ///
    /// An `id` in `row` is ignored. `create_date` and `update_date` are
    /// stamped when the table has them.
    pub async fn insert_with_generated_id(
        &self,
        table: &str,
        row: &Row,
    ) -> Result<i64, CatalogError> {
        let schema = self.registry.table(table)?;
        require_id(schema)?;

        let mut row = row.clone();
        row.remove("id");
        schema.check_columns(row.keys())?;
        let now = serde_json::Value::String(now());
        for stamp in [CREATE_DATE, UPDATE_DATE] {
            if schema.has_column(stamp) {
                row.insert(stamp.to_string(), now.clone());
            }
        }

        let mut tx = self.pool.begin().await?;
        let id: i64 = sqlx::query_scalar(&format!(
            "SELECT COALESCE(MAX(id), 0) + 1 FROM \"{}\"",
            schema.name
        ))
        .fetch_one(&mut *tx)
        .await?;
        row.insert("id".to_string(), serde_json::Value::from(id));

        let columns: Vec<String> = row.keys().map(|c| format!("\"{}\"", c)).collect();
        let placeholders = vec!["?"; row.len()].join(", ");
        let sql = format!(
            "INSERT INTO \"{}\" ({}) VALUES ({})",
            schema.name,
            columns.join(", "),
            placeholders
        );
        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = bind_value(query, value);
        }
        query.execute(&mut *tx).await?;
        tx.commit().await?;

        log::debug!("inserted {}.id = {}", table, id);
        Ok(id)
    }

    /// Rows whose columns equal every pair of `filter`. An empty filter selects all.
    pub async fn select_where(&self, table: &str, filter: &Row) -> Result<Vec<Row>, CatalogError> {
        let schema = self.registry.table(table)?;
        schema.check_columns(filter.keys())?;

        let order = if schema.has_column("id") {
            " ORDER BY id ASC"
        } else {
            ""
        };
        let sql = format!(
            "SELECT * FROM \"{}\"{}{}",
            schema.name,
            where_clause(filter),
            order
        );
        let mut query = sqlx::query(&sql);
        for value in filter.values() {
            query = bind_value(query, value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    pub async fn select_all(&self, table: &str) -> Result<Vec<Row>, CatalogError> {
        self.select_where(table, &Row::new()).await
    }

    /// Set `changes` on rows matching `filter`. Returns the number of rows updated.
    ///
    /// `id` cannot be changed. `update_date` is stamped when present.
    pub async fn update_where(
        &self,
        table: &str,
        filter: &Row,
        changes: &Row,
    ) -> Result<u64, CatalogError> {
        let schema = self.registry.table(table)?;
        schema.check_columns(filter.keys())?;
        schema.check_columns(changes.keys())?;
        if changes.contains_key("id") {
            return Err(CatalogError::Invalid("the id column cannot be updated".into()));
        }
        if changes.is_empty() {
            return Err(CatalogError::Invalid("no columns to update".into()));
        }

        let mut changes = changes.clone();
        if schema.has_column(UPDATE_DATE) {
            changes.insert(UPDATE_DATE.to_string(), serde_json::Value::String(now()));
        }

        let assignments: Vec<String> = changes.keys().map(|c| format!("\"{}\" = ?", c)).collect();
        let sql = format!(
            "UPDATE \"{}\" SET {}{}",
            schema.name,
            assignments.join(", "),
            where_clause(filter)
        );
        let mut query = sqlx::query(&sql);
        for value in changes.values().chain(filter.values()) {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    /// Delete rows matching `filter` and return their ids, ascending.
    ///
    /// An empty filter is rejected rather than emptying the table.
    pub async fn delete_where(&self, table: &str, filter: &Row) -> Result<Vec<i64>, CatalogError> {
        let schema = self.registry.table(table)?;
        require_id(schema)?;
        schema.check_columns(filter.keys())?;
        if filter.is_empty() {
            return Err(CatalogError::Invalid(
                "refusing to delete with an empty filter".into(),
            ));
        }

        let clause = where_clause(filter);
        let mut tx = self.pool.begin().await?;

        let select = format!("SELECT id FROM \"{}\"{} ORDER BY id ASC", schema.name, clause);
        let mut query = sqlx::query(&select);
        for value in filter.values() {
            query = bind_value(query, value);
        }
        let ids: Vec<i64> = query
            .fetch_all(&mut *tx)
            .await?
            .iter()
            .map(|r| r.get("id"))
            .collect();

        let delete = format!("DELETE FROM \"{}\"{}", schema.name, clause);
        let mut query = sqlx::query(&delete);
        for value in filter.values() {
            query = bind_value(query, value);
        }
        query.execute(&mut *tx).await?;
        tx.commit().await?;

        log::debug!("deleted {} row(s) from {}", ids.len(), table);
        Ok(ids)
    }

    /// All ids in `table`, ascending.
    pub async fn ids(&self, table: &str) -> Result<Vec<i64>, CatalogError> {
        let schema = self.registry.table(table)?;
        require_id(schema)?;
        Ok(
            sqlx::query_scalar(&format!("SELECT id FROM \"{}\" ORDER BY id ASC", schema.name))
                .fetch_all(&self.pool)
                .await?,
        )
    }
}

fn require_id(schema: &TableSchema) -> Result<(), CatalogError> {
    if schema.has_column("id") {
        Ok(())
    } else {
        Err(CatalogError::Invalid(format!(
            "table '{}' has no id column",
            schema.name
        )))
    }
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// ` WHERE "a" = ? AND "b" = ?`, or empty for an empty filter.
fn where_clause(filter: &Row) -> String {
    if filter.is_empty() {
        return String::new();
    }
    let terms: Vec<String> = filter.keys().map(|c| format!("\"{}\" = ?", c)).collect();
    format!(" WHERE {}", terms.join(" AND "))
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &serde_json::Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        serde_json::Value::Null => query.bind(None::<String>),
        serde_json::Value::Bool(b) => query.bind(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => query.bind(i),
            None => query.bind(n.as_f64().unwrap_or_default()),
        },
        serde_json::Value::String(s) => query.bind(s.clone()),
        other => query.bind(other.to_string()),
    }
}

fn decode_row(row: &SqliteRow) -> Result<Row, CatalogError> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let (is_null, kind) = {
            let raw = row.try_get_raw(i)?;
            (raw.is_null(), raw.type_info().name().to_string())
        };
        let value = if is_null {
            serde_json::Value::Null
        } else {
            match kind.as_str() {
                "INTEGER" | "BOOLEAN" => serde_json::Value::from(row.try_get::<i64, _>(i)?),
                "REAL" => serde_json::Number::from_f64(row.try_get::<f64, _>(i)?)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                "BLOB" => serde_json::Value::from(row.try_get::<Vec<u8>, _>(i)?),
                _ => serde_json::Value::String(row.try_get::<String, _>(i)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::migrate::migrate_catalog;
    use serde_json::json;
    use tempfile::TempDir;

    async fn catalog() -> (Catalog, TempDir) {
        let tmp = TempDir::new().unwrap();
        let pool = db::connect_path(&tmp.path().join("catalog.sqlite"))
            .await
            .unwrap();
        migrate_catalog(&pool, "products").await.unwrap();
        (Catalog::open(pool).await.unwrap(), tmp)
    }

    fn product(name: &str, color: &str, price: f64) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), json!(name));
        row.insert("color".into(), json!(color));
        row.insert("price".into(), json!(price));
        row.insert("description".into(), json!("x"));
        row
    }

    fn filter(key: &str, value: serde_json::Value) -> Row {
        let mut row = Row::new();
        row.insert(key.into(), value);
        row
    }

    #[tokio::test]
    async fn test_registry_introspects_columns() {
        let (catalog, _tmp) = catalog().await;
        assert_eq!(catalog.tables(), vec!["products"]);
        let columns = catalog.columns("products").unwrap();
        let id = columns.iter().find(|c| c.name == "id").unwrap();
        assert!(id.primary_key);
        assert_eq!(
            columns.iter().find(|c| c.name == "price").unwrap().decl_type,
            "REAL"
        );
        assert!(matches!(
            catalog.columns("orders"),
            Err(CatalogError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn test_generated_ids_and_stamps() {
        let (catalog, _tmp) = catalog().await;
        let a = catalog
            .insert_with_generated_id("products", &product("Ring", "gold", 100.0))
            .await
            .unwrap();
        let b = catalog
            .insert_with_generated_id("products", &product("Watch", "silver", 300.0))
            .await
            .unwrap();
        assert_eq!((a, b), (1, 2));

        let rows = catalog.select_where("products", &filter("id", json!(1))).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], json!("Ring"));
        assert_eq!(rows[0]["price"], json!(100.0));
        assert!(rows[0]["create_date"].is_string());
    }

    #[tokio::test]
    async fn test_unknown_column_rejected() {
        let (catalog, _tmp) = catalog().await;
        let mut row = product("Ring", "gold", 100.0);
        row.insert("weight; DROP TABLE products".into(), json!(1));
        let err = catalog
            .insert_with_generated_id("products", &row)
            .await
            .unwrap_err();
        assert!(matches!(err, CatalogError::UnknownColumn { .. }));
    }

    #[tokio::test]
    async fn test_update_where() {
        let (catalog, _tmp) = catalog().await;
        catalog
            .insert_with_generated_id("products", &product("Ring", "gold", 100.0))
            .await
            .unwrap();
        let n = catalog
            .update_where("products", &filter("id", json!(1)), &filter("price", json!(120)))
            .await
            .unwrap();
        assert_eq!(n, 1);
        let rows = catalog.select_all("products").await.unwrap();
        assert_eq!(rows[0]["price"], json!(120.0));

        assert!(catalog
            .update_where("products", &Row::new(), &filter("id", json!(7)))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_delete_where_returns_ids() {
        let (catalog, _tmp) = catalog().await;
        for (name, color) in [("Ring", "gold"), ("Watch", "silver"), ("Chain", "gold")] {
            catalog
                .insert_with_generated_id("products", &product(name, color, 10.0))
                .await
                .unwrap();
        }
        let ids = catalog
            .delete_where("products", &filter("color", json!("gold")))
            .await
            .unwrap();
        assert_eq!(ids, vec![1, 3]);
        assert_eq!(catalog.ids("products").await.unwrap(), vec![2]);

        assert!(matches!(
            catalog.delete_where("products", &Row::new()).await,
            Err(CatalogError::Invalid(_))
        ));
    }
}
