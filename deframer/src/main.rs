/*
deframer - single-binary main.rs
This binary runs the refresh worker and the Rocket HTTP server inside the same process.
*/

use anyhow::{Context, Result};
use clap::Parser;
use common::{init_db_pool, Config};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use deframer::ingestion::{FeedRsParser, HttpDownloader};
use deframer::llm::remote::RemoteCompletionClient;
use deframer::pipeline::Pipeline;
use deframer::reframer::Reframer;
use deframer::retry::RetryPolicy;
use deframer::server::{launch_rocket, AppState};
use deframer::source::{PromptRegistry, SourceDocument};
use deframer::storage::{self, FeedCache, ItemLedger};
use deframer::worker::{run_cycle, run_worker};

const DEFAULT_API_URL: &str = "http://localhost:11434/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_USER_AGENT: &str = concat!("deframer/", env!("CARGO_PKG_VERSION"));

#[derive(Parser, Debug)]
#[command(name = "deframer", about = "Deframer single-binary server + refresh worker")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Run one refresh cycle and exit
    #[arg(long)]
    once: bool,

    /// Run the refresh worker only (do not bind HTTP server)
    #[arg(long)]
    no_server: bool,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // .env first, so the environment overrides below can come from it
    dotenv::dotenv().ok();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let config = load_config(args.config).await?;

    let db_pool = match init_db_pool(&config.database.path).await {
        Ok(p) => p,
        Err(e) => {
            error!(%e, db_path = %config.database.path, "failed to initialize database pool");
            return Err(e);
        }
    };
    storage::ensure_schema(&db_pool).await?;

    let pipeline = Arc::new(build_pipeline(&config, db_pool).await?);
    info!(feeds = pipeline.feeds().len(), "pipeline ready");

    info!("Performing initial refresh...");
    run_cycle(&pipeline).await;

    if args.once {
        info!("single refresh finished (--once)");
        return Ok(());
    }

    let shutdown_notify = Arc::new(Notify::new());
    let interval = Duration::from_secs(config.interval_minutes() * 60);

    if args.no_server {
        info!("Starting in worker-only mode");
        let worker = run_worker(pipeline.clone(), interval, shutdown_notify.clone());

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received, notifying worker to shutdown");
                shutdown_notify.notify_one();
            }
            _ = worker => {}
        }
        info!("worker-only run finished");
        return Ok(());
    }

    info!("Spawning background worker task");
    let worker_handle = tokio::spawn(run_worker(pipeline.clone(), interval, shutdown_notify.clone()));

    let server = config.server.clone().unwrap_or_default();
    let bind = server.bind.unwrap_or_else(|| "127.0.0.1".to_string());
    let port = server.port.unwrap_or(8000);

    if let Err(e) = launch_rocket(AppState::new(pipeline), &bind, port).await {
        error!(%e, "Rocket server failed");
    }

    info!("HTTP server stopped; notifying worker to shutdown");
    shutdown_notify.notify_one();

    match tokio::time::timeout(Duration::from_secs(20), worker_handle).await {
        Ok(Ok(())) => info!("worker exited cleanly"),
        Ok(Err(join_err)) => error!(%join_err, "worker task panicked"),
        Err(_) => info!("Timed out waiting for worker to exit; continuing shutdown"),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Resolve config paths, merge defaults with the override, then apply the environment.
async fn load_config(explicit: Option<PathBuf>) -> Result<Config> {
    let default_path = PathBuf::from("config.default.toml");

    let override_path = if let Some(p) = explicit {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let mut config = Config::load_with_defaults(
        if default_path.exists() { Some(&default_path) } else { None },
        override_path.as_deref(),
    )
    .await
    .context("failed to load configuration")?;

    config.apply_env_overrides(|key| std::env::var(key).ok())?;
    config.validate()?;

    info!(default = ?default_path, override = ?override_path, "configuration loaded");
    Ok(config)
}

async fn build_pipeline(config: &Config, db_pool: sqlx::SqlitePool) -> Result<Pipeline> {
    let source = SourceDocument::from_file(&config.source.path).await?;
    if source.feeds.is_empty() {
        warn!(path = %config.source.path, "source document lists no feeds");
    }
    let prompts = PromptRegistry::new(source.prompts);
    if prompts.is_empty() {
        warn!(path = %config.source.path, "source document has no prompts, items will be republished unrevised");
    }
    info!(feeds = source.feeds.len(), languages = prompts.len(), "source document loaded");

    let llm = config.llm.clone().unwrap_or_default();
    let mut client = RemoteCompletionClient::new(
        llm.api_url.as_deref().unwrap_or(DEFAULT_API_URL),
        llm.model.as_deref().unwrap_or(DEFAULT_MODEL),
    )
    .with_defaults(llm.timeout_seconds.unwrap_or(60), llm.max_tokens, llm.temperature);

    if let Some(env) = llm.api_key_env.as_deref() {
        match std::env::var(env) {
            Ok(key) => client = client.with_api_key(key),
            Err(_) => warn!("LLM API key env var '{}' not set, calling without a token", env),
        }
    }
    info!(model = client.model(), "completion client initialized");

    let politeness = config.politeness.clone().unwrap_or_default();
    let downloader = HttpDownloader::new(
        politeness.fetch_timeout_seconds.unwrap_or(10),
        politeness.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT),
    )?
    .with_retry_policy(RetryPolicy::new(politeness.max_retries.unwrap_or(2) + 1).with_backoff(Duration::from_secs(1)));

    let reframer = Reframer::new(Arc::new(client), prompts)
        .with_retry_policy(RetryPolicy::new(config.max_attempts()));

    let pipeline = Pipeline::new(
        source.feeds,
        FeedCache::new(db_pool.clone()),
        ItemLedger::new(db_pool),
        Arc::new(downloader),
        Arc::new(FeedRsParser),
        reframer,
    )
    .with_max_age(chrono::Duration::minutes(config.max_age_minutes() as i64));

    Ok(pipeline)
}
