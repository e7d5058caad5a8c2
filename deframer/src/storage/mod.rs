//! SQLite persistence for the item ledger and the rendered-feed cache.
//!
//! Both uniqueness rules live in the schema (UNIQUE columns), not only in the code
//! that writes the rows.

use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub mod cache;
pub mod items;

pub use cache::{CacheEntry, FeedCache, NewCacheEntry};
pub use items::{item_key, ItemLedger, ItemRecord, NewItem, Revision};

/// Ensure the required schema exists. This runs CREATE TABLE IF NOT EXISTS statements
/// and is safe to call at every startup.
pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    tracing::info!("storage: ensuring DB schema");

    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS items (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            hash TEXT NOT NULL UNIQUE,
            feed_url TEXT NOT NULL,
            link TEXT NOT NULL,
            guid TEXT NOT NULL,
            title TEXT NOT NULL,
            original_title TEXT NOT NULL,
            description TEXT NOT NULL,
            content TEXT NOT NULL,
            framing REAL,
            title_ai TEXT,
            reason_ai TEXT,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL,
            CHECK (
                (framing IS NULL AND title_ai IS NULL AND reason_ai IS NULL)
                OR (framing IS NOT NULL AND title_ai IS NOT NULL AND reason_ai IS NOT NULL)
            )
        );
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS caches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            feed_url TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL,
            document TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL,
            updated_at TIMESTAMP NOT NULL
        );
        "#,
        "CREATE INDEX IF NOT EXISTS idx_items_feed_url ON items(feed_url);",
    ];

    for s in &stmts {
        sqlx::query(s)
            .execute(pool)
            .await
            .context("failed to ensure schema")?;
    }

    tracing::info!("storage: DB schema ensured");
    Ok(())
}
