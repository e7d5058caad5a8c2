use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::SqlitePool;

use crate::error::Result;

/// Default time-to-live of a rendered feed.
pub const DEFAULT_MAX_AGE_MINUTES: i64 = 90;

/// A rendered feed as stored. `id` is the opaque handle consumers fetch it by and
/// stays the same across refreshes.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct CacheEntry {
    pub id: i64,
    pub feed_url: String,
    pub title: String,
    #[serde(skip)]
    pub document: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewCacheEntry {
    pub feed_url: String,
    pub title: String,
    pub document: String,
}

/// Last rendered document per feed URL, gated by age.
#[derive(Clone)]
pub struct FeedCache {
    pool: SqlitePool,
}

impl FeedCache {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// True when an entry for `feed_url` exists and is younger than `max_age`.
    pub async fn is_fresh(&self, feed_url: &str, max_age: Duration) -> Result<bool> {
        self.is_fresh_at(feed_url, max_age, Utc::now()).await
    }

    pub async fn is_fresh_at(&self, feed_url: &str, max_age: Duration, now: DateTime<Utc>) -> Result<bool> {
        let updated_at = sqlx::query_scalar::<_, DateTime<Utc>>("SELECT updated_at FROM caches WHERE feed_url = ?")
            .bind(feed_url)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match updated_at {
            Some(updated_at) => now - updated_at < max_age,
            None => false,
        })
    }

    /// Insert or fully replace the entry for `entry.feed_url`, stamping it with the
    /// current time.
    pub async fn upsert(&self, entry: &NewCacheEntry) -> Result<()> {
        self.upsert_at(entry, Utc::now()).await
    }

    pub async fn upsert_at(&self, entry: &NewCacheEntry, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO caches (feed_url, title, document, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(feed_url) DO UPDATE SET
                title = excluded.title,
                document = excluded.document,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&entry.feed_url)
        .bind(&entry.title)
        .bind(&entry.document)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        tracing::debug!(feed_url = %entry.feed_url, bytes = entry.document.len(), "feed cache updated");
        Ok(())
    }

    pub async fn find_by_id(&self, id: i64) -> Result<Option<CacheEntry>> {
        Ok(sqlx::query_as::<_, CacheEntry>("SELECT * FROM caches WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_by_feed_url(&self, feed_url: &str) -> Result<Option<CacheEntry>> {
        Ok(sqlx::query_as::<_, CacheEntry>("SELECT * FROM caches WHERE feed_url = ?")
            .bind(feed_url)
            .fetch_optional(&self.pool)
            .await?)
    }

    pub async fn find_all(&self) -> Result<Vec<CacheEntry>> {
        Ok(sqlx::query_as::<_, CacheEntry>("SELECT * FROM caches ORDER BY id")
            .fetch_all(&self.pool)
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::test_support::memory_pool;
    use chrono::TimeZone;

    fn entry(document: &str) -> NewCacheEntry {
        NewCacheEntry {
            feed_url: "https://example.com/rss".into(),
            title: "dummy title".into(),
            document: document.into(),
        }
    }

    #[tokio::test]
    async fn ttl_boundary() {
        let cache = FeedCache::new(memory_pool().await);
        let max_age = Duration::minutes(DEFAULT_MAX_AGE_MINUTES);
        let t = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();

        cache.upsert_at(&entry("<rss/>"), t).await.unwrap();

        let url = "https://example.com/rss";
        assert!(cache.is_fresh_at(url, max_age, t + Duration::minutes(89)).await.unwrap());
        assert!(!cache.is_fresh_at(url, max_age, t + Duration::minutes(91)).await.unwrap());
    }

    #[tokio::test]
    async fn missing_entry_is_never_fresh() {
        let cache = FeedCache::new(memory_pool().await);
        assert!(!cache.is_fresh("nonexistent", Duration::minutes(5)).await.unwrap());
    }

    #[tokio::test]
    async fn fresh_right_after_write() {
        let cache = FeedCache::new(memory_pool().await);
        cache.upsert(&entry("<rss/>")).await.unwrap();
        assert!(cache.is_fresh("https://example.com/rss", Duration::minutes(5)).await.unwrap());
        assert!(!cache
            .is_fresh("https://example.com/rss", Duration::zero())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn upsert_replaces_document_and_timestamp_but_keeps_id() {
        let cache = FeedCache::new(memory_pool().await);
        let t0 = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let t1 = t0 + Duration::minutes(120);

        cache.upsert_at(&entry("<rss>initial content</rss>"), t0).await.unwrap();
        let first = cache.find_by_feed_url("https://example.com/rss").await.unwrap().unwrap();

        let mut updated = entry("<rss>updated content</rss>");
        updated.title = "new title".into();
        cache.upsert_at(&updated, t1).await.unwrap();
        let second = cache.find_by_feed_url("https://example.com/rss").await.unwrap().unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.document, "<rss>updated content</rss>");
        assert_eq!(second.title, "new title");
        assert_eq!(second.created_at, t0);
        assert_eq!(second.updated_at, t1);
        assert_eq!(cache.find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lookup_by_id() {
        let cache = FeedCache::new(memory_pool().await);
        cache.upsert(&entry("<rss/>")).await.unwrap();
        let all = cache.find_all().await.unwrap();
        let found = cache.find_by_id(all[0].id).await.unwrap().unwrap();
        assert_eq!(found.document, "<rss/>");
        assert!(cache.find_by_id(all[0].id + 100).await.unwrap().is_none());
    }
}
