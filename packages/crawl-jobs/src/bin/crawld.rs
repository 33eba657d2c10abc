//! Crawl scheduler daemon: wires the store, queue, runner, and due sweep.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;

use crawl_jobs::{
    Config, ExecutionDispatcher, ExecutionRunner, JobStore, PostgresJobStore, TaskQueue,
    TokioTaskQueue,
};
use listing_crawler::PageFetcher;
use scrapingant_client::ScrapingAntClient;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    let store: Arc<dyn JobStore> = Arc::new(PostgresJobStore::new(pool));
    let fetcher: Arc<dyn PageFetcher> =
        Arc::new(ScrapingAntClient::new(config.scrapingant_api_key.clone())?);

    let runner = ExecutionRunner::new(
        Arc::clone(&store),
        fetcher,
        config.checkpoint_dir.clone(),
    )
    .with_timeout(Duration::from_secs(config.execution_timeout_secs));

    let queue: Arc<dyn TaskQueue> = Arc::new(TokioTaskQueue::new(Arc::new(runner)));
    let dispatcher = Arc::new(ExecutionDispatcher::new(store, queue));

    let mut scheduler = crawl_jobs::start_scheduler(dispatcher).await?;
    tracing::info!("crawld running, press ctrl-c to stop");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    scheduler.shutdown().await?;

    Ok(())
}
