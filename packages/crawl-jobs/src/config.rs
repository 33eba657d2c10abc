use anyhow::{Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub scrapingant_api_key: String,
    /// Root directory for crawl checkpoints.
    pub checkpoint_dir: PathBuf,
    pub execution_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            scrapingant_api_key: env::var("SCRAPINGANT_API_KEY")
                .context("SCRAPINGANT_API_KEY must be set")?,
            checkpoint_dir: env::var("CHECKPOINT_DIR")
                .unwrap_or_else(|_| "./checkpoints".to_string())
                .into(),
            execution_timeout_secs: env::var("EXECUTION_TIMEOUT_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .context("EXECUTION_TIMEOUT_SECS must be a valid number")?,
        })
    }
}
