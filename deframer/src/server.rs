use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use rocket::figment::Figment;
use rocket::http::{ContentType, Status};
use rocket::serde::json::Json;
use rocket::{get, post, routes, Build, Rocket, State};
use serde::Serialize;

use crate::pipeline::Pipeline;
use crate::storage::CacheEntry;

/// Application state stored inside Rocket managed state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self { pipeline }
    }
}

/// One cached feed as listed by the API. The document itself is fetched by id.
#[derive(Debug, Serialize)]
struct FeedSummary {
    id: i64,
    feed_url: String,
    title: String,
    updated_at: DateTime<Utc>,
}

impl From<CacheEntry> for FeedSummary {
    fn from(entry: CacheEntry) -> Self {
        Self {
            id: entry.id,
            feed_url: entry.feed_url,
            title: entry.title,
            updated_at: entry.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct RefreshResponse {
    refreshed: usize,
    error: Option<String>,
}

#[get("/health")]
async fn health() -> &'static str {
    "OK"
}

#[get("/api/v1/feeds")]
async fn list_feeds(state: &State<AppState>) -> Result<Json<Vec<FeedSummary>>, Status> {
    let entries = state.pipeline.cache().find_all().await.map_err(|e| {
        tracing::error!("Failed to list cached feeds: {}", e);
        Status::InternalServerError
    })?;
    Ok(Json(entries.into_iter().map(FeedSummary::from).collect()))
}

/// Serve the last rendered document of a feed by its cache id.
#[get("/api/v1/feeds/<id>/rss")]
async fn feed_rss(state: &State<AppState>, id: i64) -> Result<(ContentType, String), Status> {
    match state.pipeline.cache().find_by_id(id).await {
        Ok(Some(entry)) => Ok((ContentType::XML, entry.document)),
        Ok(None) => Err(Status::NotFound),
        Err(e) => {
            tracing::error!("Failed to read cached feed {}: {}", id, e);
            Err(Status::InternalServerError)
        }
    }
}

/// Run a refresh cycle now and report how far it got.
#[post("/api/v1/refresh")]
async fn trigger_refresh(state: &State<AppState>) -> (Status, Json<RefreshResponse>) {
    tracing::info!("Manual trigger: refreshing feeds");
    match state.pipeline.refresh_all().await {
        Ok(refreshed) => (
            Status::Ok,
            Json(RefreshResponse {
                refreshed,
                error: None,
            }),
        ),
        Err(aborted) => (
            Status::InternalServerError,
            Json(RefreshResponse {
                refreshed: aborted.completed,
                error: Some(aborted.source.to_string()),
            }),
        ),
    }
}

/// Build the Rocket instance with managed state and every route mounted. `figment`
/// carries address/port; tests pass the default one.
pub fn build_rocket(state: AppState, figment: Figment) -> Rocket<Build> {
    rocket::custom(figment)
        .manage(state)
        .mount("/", routes![health, list_feeds, feed_rss, trigger_refresh])
}

/// Launch the HTTP server on `bind:port` and block until it shuts down (Ctrl-C or
/// SIGTERM, handled by Rocket).
pub async fn launch_rocket(state: AppState, bind: &str, port: u16) -> Result<()> {
    let fig = rocket::Config::figment()
        .merge(("address", bind.to_string()))
        .merge(("port", port));

    tracing::info!("Starting Rocket HTTP server on {}:{}", bind, port);
    build_rocket(state, fig)
        .launch()
        .await
        .map_err(|e| anyhow!("Rocket failed: {}", e))?;

    tracing::info!("Rocket HTTP server has shut down");
    Ok(())
}
