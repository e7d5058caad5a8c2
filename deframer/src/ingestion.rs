use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::{Entry, Feed, FeedType, Person};
use feed_rs::parser;
use reqwest::Client;
use std::time::Duration;

use crate::error::{DeframeError, Result};
use crate::retry::{retry, RetryPolicy};

/// Channel-level data of a parsed upstream feed, independent of its wire format.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedFeed {
    pub title: String,
    pub link: String,
    /// "rss", "atom" or "json"
    pub format: String,
    pub description: String,
    pub copyright: String,
    pub author: Option<Author>,
    pub image: Option<Image>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
    pub items: Vec<ParsedItem>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedItem {
    pub guid: String,
    pub link: String,
    pub title: String,
    pub description: String,
    pub content: String,
    pub author: Option<Author>,
    pub published: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Image {
    pub url: String,
    pub title: String,
}

/// Fetches the raw bytes of a feed.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

/// Turns raw feed bytes into a [`ParsedFeed`].
pub trait FeedParser: Send + Sync {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed>;
}

/// Downloads feeds over HTTP.
/// Enforces a timeout and retries server errors, rate limiting and network failures
/// with exponential backoff. Other client errors (4xx) fail at once.
pub struct HttpDownloader {
    client: Client,
    policy: RetryPolicy,
}

/// One failed fetch attempt, sorted by whether another try could help.
#[derive(Debug)]
enum FetchError {
    Transient(String),
    Permanent(String),
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Transient(msg) | FetchError::Permanent(msg) => f.write_str(msg),
        }
    }
}

impl HttpDownloader {
    pub fn new(timeout_secs: u64, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(user_agent)
            .build()
            .map_err(|e| DeframeError::Download(format!("failed to build reqwest client: {}", e)))?;

        Ok(Self {
            client,
            policy: RetryPolicy::new(3).with_backoff(Duration::from_secs(1)),
        })
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn fetch_once(&self, url: &str) -> std::result::Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Transient(format!("network error during fetch: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            let bytes = response
                .bytes()
                .await
                .map_err(|e| FetchError::Transient(format!("failed to read response body: {}", e)))?;
            Ok(bytes.to_vec())
        } else if status.is_server_error() {
            Err(FetchError::Transient(format!("server error: {}", status)))
        } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            Err(FetchError::Transient(format!("rate limited: {}", status)))
        } else {
            // Client error (4xx) - likely permanent, don't retry
            Err(FetchError::Permanent(format!("feed fetch failed with status: {}", status)))
        }
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        retry(
            self.policy,
            |e: &FetchError| matches!(e, FetchError::Transient(_)),
            |attempt| {
                if attempt > 1 {
                    tracing::info!("Retrying feed fetch for {} (attempt {}/{})", url, attempt, self.policy.attempts);
                }
                self.fetch_once(url)
            },
        )
        .await
        .map_err(|e| DeframeError::Download(format!("{}: {}", url, e)))
    }
}

/// Parses RSS 0.9x/1.0/2.0, Atom and JSON Feed with feed-rs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FeedRsParser;

impl FeedParser for FeedRsParser {
    fn parse(&self, bytes: &[u8]) -> Result<ParsedFeed> {
        let feed = parser::parse(bytes).map_err(|e| DeframeError::Parse(e.to_string()))?;
        Ok(convert_feed(feed))
    }
}

fn convert_feed(feed: Feed) -> ParsedFeed {
    let format = match feed.feed_type {
        FeedType::Atom => "atom",
        FeedType::JSON => "json",
        FeedType::RSS0 | FeedType::RSS1 | FeedType::RSS2 => "rss",
    };

    let image = feed.logo.or(feed.icon).map(|img| Image {
        url: img.uri,
        title: img.title.unwrap_or_default(),
    });

    ParsedFeed {
        title: feed.title.map(|t| t.content).unwrap_or_default(),
        link: feed.links.first().map(|l| l.href.clone()).unwrap_or_default(),
        format: format.to_string(),
        description: feed.description.map(|t| t.content).unwrap_or_default(),
        copyright: feed.rights.map(|t| t.content).unwrap_or_default(),
        author: first_author(&feed.authors),
        image,
        published: feed.published,
        updated: feed.updated,
        items: feed.entries.into_iter().map(convert_entry).collect(),
    }
}

fn convert_entry(entry: Entry) -> ParsedItem {
    ParsedItem {
        link: entry.links.first().map(|l| l.href.clone()).unwrap_or_default(),
        title: entry.title.map(|t| t.content).unwrap_or_default(),
        description: entry.summary.map(|t| t.content).unwrap_or_default(),
        content: entry.content.and_then(|c| c.body).unwrap_or_default(),
        author: first_author(&entry.authors),
        published: entry.published,
        updated: entry.updated,
        guid: entry.id,
    }
}

fn first_author(people: &[Person]) -> Option<Author> {
    people.first().map(|p| Author {
        name: p.name.clone(),
        email: p.email.clone(),
    })
}
