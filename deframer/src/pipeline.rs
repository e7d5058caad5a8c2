//! One refresh cycle: for every configured feed that is not fresh in the cache,
//! download, parse, deframe each item through the ledger, render and store.

use chrono::Duration;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::error::{DeframeError, Result};
use crate::ingestion::{Downloader, FeedParser, ParsedFeed};
use crate::reframer::Reframer;
use crate::render::{OutputFeed, OutputItem};
use crate::source::FeedDescriptor;
use crate::storage::{item_key, FeedCache, ItemLedger, NewCacheEntry};

/// Prefix of every republished channel title.
pub const TITLE_PREFIX: &str = "[Deframed] ";

/// A refresh cycle stopped at a feed it could not download, parse or store.
/// Feeds refreshed before that point keep their new cache entries.
#[derive(Debug, Error)]
#[error("refresh aborted after {completed} feed(s): {source}")]
pub struct RefreshAborted {
    pub completed: usize,
    #[source]
    pub source: DeframeError,
}

pub struct Pipeline {
    feeds: Vec<FeedDescriptor>,
    cache: FeedCache,
    ledger: ItemLedger,
    downloader: Arc<dyn Downloader>,
    parser: Arc<dyn FeedParser>,
    reframer: Reframer,
    max_age: Duration,
}

impl Pipeline {
    pub fn new(
        feeds: Vec<FeedDescriptor>,
        cache: FeedCache,
        ledger: ItemLedger,
        downloader: Arc<dyn Downloader>,
        parser: Arc<dyn FeedParser>,
        reframer: Reframer,
    ) -> Self {
        Self {
            feeds,
            cache,
            ledger,
            downloader,
            parser,
            reframer,
            max_age: Duration::minutes(crate::storage::cache::DEFAULT_MAX_AGE_MINUTES),
        }
    }

    pub fn with_max_age(mut self, max_age: Duration) -> Self {
        self.max_age = max_age;
        self
    }

    pub fn feeds(&self) -> &[FeedDescriptor] {
        &self.feeds
    }

    pub fn cache(&self) -> &FeedCache {
        &self.cache
    }

    /// Refresh every stale feed, in configuration order. Returns how many feeds were
    /// rebuilt; fresh feeds are skipped and count zero.
    pub async fn refresh_all(&self) -> std::result::Result<usize, RefreshAborted> {
        let mut refreshed = 0;

        for feed in &self.feeds {
            let step = async {
                if self.cache.is_fresh(&feed.url, self.max_age).await? {
                    debug!(feed_url = %feed.url, "cache is fresh, skipping");
                    return Ok(false);
                }
                self.refresh_feed(feed).await?;
                Ok::<_, DeframeError>(true)
            };

            match step.await {
                Ok(true) => refreshed += 1,
                Ok(false) => {}
                Err(source) => {
                    warn!(feed_url = %feed.url, completed = refreshed, error = %source, "refresh cycle aborted");
                    return Err(RefreshAborted {
                        completed: refreshed,
                        source,
                    });
                }
            }
        }

        info!(refreshed, total = self.feeds.len(), "refresh cycle finished");
        Ok(refreshed)
    }

    /// Rebuild one feed regardless of its cache age.
    pub async fn refresh_feed(&self, feed: &FeedDescriptor) -> Result<()> {
        info!(feed_url = %feed.url, language = %feed.language, "refreshing feed");

        let bytes = self.downloader.fetch(&feed.url).await?;
        let parsed = self.parser.parse(&bytes)?;

        let title = if parsed.title.is_empty() {
            // some feeds have no title at all
            feed.url.as_str()
        } else {
            parsed.title.as_str()
        };
        let display_title = format!("{} ({})", title, feed.language);

        let output = self.deframe_feed(feed, parsed).await?;
        let document = output.to_rss()?;

        self.cache
            .upsert(&NewCacheEntry {
                feed_url: feed.url.clone(),
                title: display_title,
                document,
            })
            .await?;

        info!(feed_url = %feed.url, items = output.items.len(), "feed refreshed");
        Ok(())
    }

    async fn deframe_feed(&self, feed: &FeedDescriptor, parsed: ParsedFeed) -> Result<OutputFeed> {
        let mut output = OutputFeed {
            title: format!("{}{}", TITLE_PREFIX, parsed.title),
            link: parsed.link,
            link_type: parsed.format,
            description: parsed.description,
            copyright: parsed.copyright,
            author: parsed.author,
            image: parsed.image,
            published: parsed.published,
            updated: parsed.updated,
            items: Vec::with_capacity(parsed.items.len()),
        };

        for item in parsed.items {
            let key = item_key(&feed.url, &item.guid);
            let record = self
                .ledger
                .get_or_compute(&key, || async { Ok(self.reframer.reframe(feed, &item).await) })
                .await?;

            output.add(OutputItem {
                title: record.title,
                link: record.link,
                description: record.description,
                content: record.content,
                guid: record.guid,
                author: item.author,
                published: item.published,
                updated: item.updated,
            });
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingestion::FeedRsParser;
    use crate::llm::CompletionClient;
    use crate::retry::RetryPolicy;
    use crate::source::{PromptRegistry, PromptTemplate};
    use crate::storage::test_support::memory_pool;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const FEED_A: &str = "https://a.example/rss";
    const FEED_B: &str = "https://b.example/rss";

    fn rss(title: &str, items: &[(&str, &str)]) -> Vec<u8> {
        let items: String = items
            .iter()
            .map(|(guid, title)| {
                format!(
                    "<item><title>{}</title><link>https://a.example/{}</link><guid>{}</guid>\
                     <description>About {}</description></item>",
                    title, guid, guid, title
                )
            })
            .collect();
        format!(
            "<?xml version=\"1.0\"?><rss version=\"2.0\"><channel><title>{}</title>\
             <link>https://a.example/</link><description>d</description>{}</channel></rss>",
            title, items
        )
        .into_bytes()
    }

    struct StaticDownloader {
        bodies: HashMap<String, Vec<u8>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Downloader for StaticDownloader {
        async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.bodies
                .get(url)
                .cloned()
                .ok_or_else(|| DeframeError::Download(format!("404 Not Found: {}", url)))
        }
    }

    struct FixedClient {
        answer: String,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CompletionClient for FixedClient {
        async fn complete(&self, _system: &str, user: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // echo the item title back so each revision is distinguishable
            let title = user.lines().next().unwrap_or_default().trim_start_matches("Title: ");
            Ok(self.answer.replace("$T", title))
        }
    }

    struct Harness {
        pipeline: Pipeline,
        downloader: Arc<StaticDownloader>,
        client: Arc<FixedClient>,
    }

    async fn harness(feeds: Vec<(&str, &str)>, bodies: Vec<(&str, Vec<u8>)>) -> Harness {
        let pool = memory_pool().await;
        let downloader = Arc::new(StaticDownloader {
            bodies: bodies.into_iter().map(|(u, b)| (u.to_string(), b)).collect(),
            calls: AtomicUsize::new(0),
        });
        let client = Arc::new(FixedClient {
            answer: r#"{"title_corrected": "Calm $T", "framing": 0.8, "reason": "sensational"}"#.into(),
            calls: AtomicUsize::new(0),
        });
        let prompts = PromptRegistry::new(vec![PromptTemplate {
            language: "en".into(),
            user: "Title: $TITLE\nDescription: $DESCRIPTION".into(),
            system: "Assess framing.".into(),
        }]);
        let reframer = Reframer::new(client.clone(), prompts)
            .with_retry_policy(RetryPolicy::new(2).with_backoff(std::time::Duration::ZERO));

        let feeds = feeds
            .into_iter()
            .map(|(url, language)| FeedDescriptor {
                url: url.into(),
                language: language.into(),
            })
            .collect();

        let pipeline = Pipeline::new(
            feeds,
            FeedCache::new(pool.clone()),
            ItemLedger::new(pool),
            downloader.clone(),
            Arc::new(FeedRsParser),
            reframer,
        );

        Harness {
            pipeline,
            downloader,
            client,
        }
    }

    #[tokio::test]
    async fn refresh_deframes_and_caches() {
        let h = harness(
            vec![(FEED_A, "en")],
            vec![(FEED_A, rss("Daily", &[("1", "Storm chaos"), ("2", "Market panic")]))],
        )
        .await;

        assert_eq!(h.pipeline.refresh_all().await.unwrap(), 1);

        let entry = h.pipeline.cache().find_by_feed_url(FEED_A).await.unwrap().unwrap();
        assert_eq!(entry.title, "Daily (en)");

        let doc = FeedRsParser.parse(entry.document.as_bytes()).unwrap();
        assert_eq!(doc.title, "[Deframed] Daily");
        let titles: Vec<_> = doc.items.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Framing: 0.8 - Calm Storm chaos", "Framing: 0.8 - Calm Market panic"]
        );
        assert_eq!(entry.document.matches("Framing: 0.8 - Calm Storm chaos").count(), 1);
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fresh_feeds_are_skipped() {
        let h = harness(vec![(FEED_A, "en")], vec![(FEED_A, rss("Daily", &[("1", "Storm chaos")]))]).await;

        assert_eq!(h.pipeline.refresh_all().await.unwrap(), 1);
        assert_eq!(h.pipeline.refresh_all().await.unwrap(), 0);
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stored_items_are_not_asked_again() {
        let h = harness(vec![(FEED_A, "en")], vec![(FEED_A, rss("Daily", &[("1", "Storm chaos")]))]).await;
        let feed = h.pipeline.feeds()[0].clone();

        h.pipeline.refresh_feed(&feed).await.unwrap();
        h.pipeline.refresh_feed(&feed).await.unwrap();

        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.pipeline.cache().find_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failing_feed_aborts_with_partial_count() {
        let h = harness(
            vec![(FEED_A, "en"), (FEED_B, "en"), ("https://c.example/rss", "en")],
            vec![(FEED_A, rss("Daily", &[("1", "Storm chaos")]))],
        )
        .await;

        let err = h.pipeline.refresh_all().await.unwrap_err();
        assert_eq!(err.completed, 1);
        assert!(matches!(err.source, DeframeError::Download(_)));
        // the first feed was stored before the abort, the third never attempted
        assert!(h.pipeline.cache().find_by_feed_url(FEED_A).await.unwrap().is_some());
        assert_eq!(h.downloader.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unparseable_feed_aborts() {
        let h = harness(vec![(FEED_A, "en")], vec![(FEED_A, b"not a feed".to_vec())]).await;
        let err = h.pipeline.refresh_all().await.unwrap_err();
        assert_eq!(err.completed, 0);
        assert!(matches!(err.source, DeframeError::Parse(_)));
        assert!(h.pipeline.cache().find_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unknown_language_passes_items_through() {
        let h = harness(vec![(FEED_B, "xx")], vec![(FEED_B, rss("Quotidien", &[("1", "Chaos total")]))]).await;

        assert_eq!(h.pipeline.refresh_all().await.unwrap(), 1);
        assert_eq!(h.client.calls.load(Ordering::SeqCst), 0);

        let entry = h.pipeline.cache().find_by_feed_url(FEED_B).await.unwrap().unwrap();
        assert_eq!(entry.title, "Quotidien (xx)");
        let doc = FeedRsParser.parse(entry.document.as_bytes()).unwrap();
        assert_eq!(doc.items[0].title, "Chaos total");
    }

    #[tokio::test]
    async fn untitled_feed_is_named_after_its_url() {
        let h = harness(vec![(FEED_A, "en")], vec![(FEED_A, rss("", &[]))]).await;
        h.pipeline.refresh_all().await.unwrap();
        let entry = h.pipeline.cache().find_by_feed_url(FEED_A).await.unwrap().unwrap();
        assert_eq!(entry.title, format!("{} (en)", FEED_A));
    }
}
