//! Crawl job definitions.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use listing_crawler::SpiderConfig;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::JobError;
use crate::schedule::{self, ScheduleKind};

/// Job lifecycle status. Mirrors the status of the job's latest execution;
/// `running` additionally gates dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" => Ok(JobStatus::Cancelled),
            other => anyhow::bail!("unknown job status: {other}"),
        }
    }
}

/// Input for creating a job.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub name: String,
    pub spider: String,
    pub start_urls: Vec<String>,
    pub schedule: ScheduleKind,
    pub cron_expression: Option<String>,
    pub config: serde_json::Value,
}

/// A stored crawl job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobDefinition {
    pub id: Uuid,
    pub name: String,
    /// Which spider implementation handles this job's portal.
    pub spider: String,
    pub start_urls: Vec<String>,
    pub status: JobStatus,
    pub schedule: ScheduleKind,
    pub cron_expression: Option<String>,
    /// Opaque spider configuration bag, validated at creation.
    pub config: serde_json::Value,
    pub next_run: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobDefinition {
    /// Validate the input and build a job row, with its first `next_run`
    /// already computed.
    pub fn create(input: NewJob) -> Result<Self, JobError> {
        if input.name.trim().is_empty() {
            return Err(JobError::Invalid("name must not be empty".into()));
        }
        if input.start_urls.is_empty() {
            return Err(JobError::Invalid("start_urls must not be empty".into()));
        }
        for url in &input.start_urls {
            url::Url::parse(url)
                .map_err(|e| JobError::Invalid(format!("invalid start URL {url}: {e}")))?;
        }

        SpiderConfig::from_value(input.config.clone())?;
        schedule::validate_schedule(input.schedule, input.cron_expression.as_deref())?;

        let now = Utc::now();
        let next_run =
            schedule::compute_next_run(input.schedule, input.cron_expression.as_deref(), now);

        Ok(Self {
            id: Uuid::new_v4(),
            name: input.name,
            spider: input.spider,
            start_urls: input.start_urls,
            status: JobStatus::Pending,
            schedule: input.schedule,
            cron_expression: input.cron_expression,
            config: input.config,
            next_run,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input() -> NewJob {
        NewJob {
            name: "idealista-madrid".into(),
            spider: "idealista".into(),
            start_urls: vec!["https://www.example.com/venta-viviendas/".into()],
            schedule: ScheduleKind::Daily,
            cron_expression: None,
            config: json!({
                "allowed_domain": "example.com",
                "target_url_pattern": "/venta-viviendas/"
            }),
        }
    }

    #[test]
    fn create_computes_initial_next_run() {
        let job = JobDefinition::create(input()).unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.next_run.unwrap() > Utc::now());
    }

    #[test]
    fn manual_jobs_have_no_next_run() {
        let mut input = input();
        input.schedule = ScheduleKind::Manual;
        let job = JobDefinition::create(input).unwrap();
        assert_eq!(job.next_run, None);
    }

    #[test]
    fn bad_cron_is_rejected_at_creation() {
        let mut input = input();
        input.schedule = ScheduleKind::Cron;
        input.cron_expression = Some("*/5 * * * *".into());
        assert!(matches!(
            JobDefinition::create(input),
            Err(JobError::Schedule(_))
        ));
    }

    #[test]
    fn bad_spider_config_is_rejected_at_creation() {
        let mut input = input();
        input.config = json!({ "allowed_domain": "" });
        assert!(matches!(JobDefinition::create(input), Err(JobError::Config(_))));
    }

    #[test]
    fn bad_start_url_is_rejected_at_creation() {
        let mut input = input();
        input.start_urls = vec!["not a url".into()];
        assert!(matches!(JobDefinition::create(input), Err(JobError::Invalid(_))));
    }
}
