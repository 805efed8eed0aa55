use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the catalog and vector index schemas. Idempotent.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    migrate_catalog(&pool, &config.index.table).await?;
    pool.close().await;

    let index_pool = db::connect_index(config).await?;
    migrate_index(&index_pool).await?;
    index_pool.close().await;
    Ok(())
}

/// Create the product table the index mirrors.
pub async fn migrate_catalog(pool: &SqlitePool, table: &str) -> Result<()> {
    if !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        anyhow::bail!("invalid table name: {}", table);
    }

    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS {table} (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            color TEXT NOT NULL,
            price REAL NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            create_date TEXT NOT NULL,
            update_date TEXT NOT NULL
        )
        "#
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{table}_color ON {table}(color)"
    ))
    .execute(pool)
    .await?;

    Ok(())
}

/// Create the vector index table.
pub async fn migrate_index(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_items (
            id INTEGER PRIMARY KEY,
            text TEXT NOT NULL,
            metadata_json TEXT NOT NULL DEFAULT '{}',
            vector BLOB NOT NULL,
            model TEXT NOT NULL,
            dims INTEGER NOT NULL,
            content_hash TEXT NOT NULL,
            indexed_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
