use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use std::future::Future;
use tracing::debug;

use crate::error::Result;

/// The model's verdict on a framed title. Stored only when it was applied, and always
/// as a whole: there is no score without a revised title or the other way round.
#[derive(Debug, Clone, PartialEq)]
pub struct Revision {
    pub framing: f64,
    /// `title_corrected` as returned by the model
    pub title: String,
    pub reason: String,
}

/// A new ledger entry, before it has a row id or timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub feed_url: String,
    pub link: String,
    pub guid: String,
    /// Published title; the "Framing: ..." title when a revision was applied
    pub title: String,
    /// Upstream title, kept for audit
    pub original_title: String,
    pub description: String,
    pub content: String,
    pub revision: Option<Revision>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ItemRecord {
    pub id: i64,
    pub hash: String,
    pub feed_url: String,
    pub link: String,
    pub guid: String,
    pub title: String,
    pub original_title: String,
    pub description: String,
    pub content: String,
    pub revision: Option<Revision>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    id: i64,
    hash: String,
    feed_url: String,
    link: String,
    guid: String,
    title: String,
    original_title: String,
    description: String,
    content: String,
    framing: Option<f64>,
    title_ai: Option<String>,
    reason_ai: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ItemRow> for ItemRecord {
    fn from(row: ItemRow) -> Self {
        // the schema CHECK guarantees all three or none
        let revision = match (row.framing, row.title_ai, row.reason_ai) {
            (Some(framing), Some(title), Some(reason)) => Some(Revision { framing, title, reason }),
            _ => None,
        };
        ItemRecord {
            id: row.id,
            hash: row.hash,
            feed_url: row.feed_url,
            link: row.link,
            guid: row.guid,
            title: row.title,
            original_title: row.original_title,
            description: row.description,
            content: row.content,
            revision,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

/// Ledger key of an item: hex SHA-256 of "{feed_url}-{guid}".
pub fn item_key(feed_url: &str, guid: &str) -> String {
    let digest = Sha256::digest(format!("{}-{}", feed_url, guid).as_bytes());
    hex::encode(digest)
}

/// Content-addressed store of every item ever seen. A record is written once and
/// never touched again, so a revision is computed at most once per item.
#[derive(Clone)]
pub struct ItemLedger {
    pool: SqlitePool,
}

impl ItemLedger {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn find_by_hash(&self, hash: &str) -> Result<Option<ItemRecord>> {
        let row = sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(ItemRecord::from))
    }

    /// Returns the stored record for `key`, computing and storing it first if absent.
    ///
    /// A stored record is returned as is, even if prompts or the model changed since.
    /// When two callers race on a new key both may run `compute`, but the insert is
    /// conflict-free and the loser re-reads, so every caller sees the committed record.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> Result<ItemRecord>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<NewItem>>,
    {
        if let Some(existing) = self.find_by_hash(key).await? {
            return Ok(existing);
        }

        let candidate = compute().await?;
        self.insert_or_get(key, candidate).await
    }

    async fn insert_or_get(&self, key: &str, item: NewItem) -> Result<ItemRecord> {
        let now = Utc::now();
        let (framing, title_ai, reason_ai) = match &item.revision {
            Some(r) => (Some(r.framing), Some(r.title.as_str()), Some(r.reason.as_str())),
            None => (None, None, None),
        };

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO items
            (hash, feed_url, link, guid, title, original_title, description, content,
             framing, title_ai, reason_ai, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(hash) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(&item.feed_url)
        .bind(&item.link)
        .bind(&item.guid)
        .bind(&item.title)
        .bind(&item.original_title)
        .bind(&item.description)
        .bind(&item.content)
        .bind(framing)
        .bind(title_ai)
        .bind(reason_ai)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if inserted == 0 {
            debug!(hash = key, "item already stored by a concurrent writer, using the committed record");
        }

        let record = sqlx::query_as::<_, ItemRow>("SELECT * FROM items WHERE hash = ?")
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(record.into())
    }
}
