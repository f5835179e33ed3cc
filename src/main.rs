use anyhow::{Context, Result};
use clap::Parser;
use reqwest::Url;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use feedsync::api::{self, AppContext};
use feedsync::config;
use feedsync::db;
use feedsync::extract::{ExtractService, ReadabilityClient};
use feedsync::inoreader::InoreaderClient;
use feedsync::scheduler;
use feedsync::summarize::MessagesApiClient;
use feedsync::sync::{Orchestrator, SyncPolicy};

#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to YAML config file
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();

    let args = Args::parse();
    let cfg = config::load(Some(&args.config))?;
    cfg.ensure_dirs()?;

    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| format!("sqlite://{}/feedsync.db", cfg.app.data_dir));
    let pool = db::init_pool(&database_url).await?;
    db::run_migrations(&pool).await?;

    // Token encryption at rest is delegated to the file store.
    let token = tokio::fs::read_to_string(&cfg.inoreader.token_file)
        .await
        .with_context(|| format!("failed to read token file {}", cfg.inoreader.token_file))?
        .trim()
        .to_string();

    let base_url = Url::parse(&cfg.inoreader.base_url).context("invalid inoreader.base_url")?;
    let source = Arc::new(InoreaderClient::new(
        base_url,
        token,
        cfg.inoreader.app_id.clone(),
        cfg.inoreader.app_key.clone(),
    ));

    let policy = SyncPolicy::from(&cfg.sync);
    let orchestrator = Arc::new(Orchestrator::new(pool.clone(), source, policy));

    let extract_url =
        Url::parse(&cfg.extraction.service_url).context("invalid extraction.service_url")?;
    let extract = ExtractService::new(
        Arc::new(ReadabilityClient::new(extract_url)),
        Duration::from_secs(cfg.extraction.timeout_seconds),
    );

    let summarizer_url = Url::parse(&cfg.summarizer.base_url).context("invalid summarizer.base_url")?;
    let summarizer = Arc::new(MessagesApiClient::new(
        summarizer_url,
        cfg.summarizer.api_key.clone(),
        cfg.summarizer.model.clone(),
        cfg.summarizer.max_tokens,
        Duration::from_secs(cfg.summarizer.timeout_seconds),
    ));

    let times: Vec<(u32, u32)> = cfg
        .app
        .sync_times
        .iter()
        .filter_map(|t| config::parse_time_of_day(t))
        .collect();
    tokio::spawn(scheduler::run(Arc::clone(&orchestrator), times));

    info!("starting feedsync daemon");
    let ctx = AppContext {
        pool,
        orchestrator,
        extract,
        summarizer,
        max_retry_attempts: cfg.sync.max_retry_attempts,
    };
    api::run(ctx, &cfg.app.bind_addr).await
}
