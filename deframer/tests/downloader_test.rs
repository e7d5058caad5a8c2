use std::time::Duration;

use deframer::error::DeframeError;
use deframer::ingestion::{Downloader, FeedParser, FeedRsParser, HttpDownloader};
use deframer::retry::RetryPolicy;

const RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0">
  <channel>
    <title>Daily</title>
    <link>https://example.com/</link>
    <description>News</description>
    <item><title>Storm chaos</title><guid>1</guid><description>A storm.</description></item>
  </channel>
</rss>"#;

fn downloader() -> HttpDownloader {
    HttpDownloader::new(5, "deframer-test")
        .unwrap()
        .with_retry_policy(RetryPolicy::new(3).with_backoff(Duration::ZERO))
}

#[tokio::test]
async fn test_fetch_success_parses() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/rss")
        .match_header("user-agent", "deframer-test")
        .with_status(200)
        .with_header("content-type", "application/rss+xml")
        .with_body(RSS)
        .create_async()
        .await;

    let bytes = downloader()
        .fetch(&format!("{}/rss", server.url()))
        .await
        .expect("fetch succeeds");
    let feed = FeedRsParser.parse(&bytes).expect("parse succeeds");

    assert_eq!(feed.title, "Daily");
    assert_eq!(feed.items.len(), 1);
    assert_eq!(feed.items[0].title, "Storm chaos");
    mock.assert_async().await;
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/missing")
        .with_status(404)
        .expect(1)
        .create_async()
        .await;

    let err = downloader()
        .fetch(&format!("{}/missing", server.url()))
        .await
        .unwrap_err();

    assert!(matches!(err, DeframeError::Download(_)));
    assert!(err.to_string().contains("404"));
    mock.assert_async().await;
}

#[tokio::test]
async fn test_server_error_is_retried_until_exhausted() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("GET", "/flaky")
        .with_status(503)
        .expect(3)
        .create_async()
        .await;

    let err = downloader()
        .fetch(&format!("{}/flaky", server.url()))
        .await
        .unwrap_err();

    assert!(matches!(err, DeframeError::Download(_)));
    assert!(!err.is_retryable());
    mock.assert_async().await;
}
