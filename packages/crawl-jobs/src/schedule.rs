//! Next-run computation for job schedules.
//!
//! Four periodic kinds plus manual. The cron form is deliberately narrow: a
//! five-field expression whose minute and hour are plain numbers and whose
//! day/month/weekday fields are wildcards ("30 6 * * *"). Anything richer is
//! rejected when the job is created; rows that predate that validation fall
//! back to "one hour from now" at sweep time, with a warning.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Days, Months, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ScheduleError;

/// Hour of day at which daily/weekly/monthly runs fire.
const PERIODIC_RUN_HOUR: u32 = 9;

/// How a job gets its executions started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    /// Only runs when explicitly dispatched.
    Manual,
    /// Every day at the periodic run hour.
    Daily,
    /// Every Monday at the periodic run hour.
    Weekly,
    /// The first of every month at the periodic run hour.
    Monthly,
    /// A restricted cron expression carried alongside the job.
    Cron,
}

impl ScheduleKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleKind::Manual => "manual",
            ScheduleKind::Daily => "daily",
            ScheduleKind::Weekly => "weekly",
            ScheduleKind::Monthly => "monthly",
            ScheduleKind::Cron => "cron",
        }
    }
}

impl fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ScheduleKind {
    type Err = ScheduleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(ScheduleKind::Manual),
            "daily" => Ok(ScheduleKind::Daily),
            "weekly" => Ok(ScheduleKind::Weekly),
            "monthly" => Ok(ScheduleKind::Monthly),
            "cron" => Ok(ScheduleKind::Cron),
            other => Err(ScheduleError::UnknownKind(other.to_string())),
        }
    }
}

/// The accepted cron subset: fixed minute and hour, wildcards elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CronSchedule {
    pub minute: u32,
    pub hour: u32,
}

impl CronSchedule {
    /// Parse a five-field cron expression of the form `M H * * *`.
    pub fn parse(expr: &str) -> Result<Self, ScheduleError> {
        let unsupported = || ScheduleError::UnsupportedCron(expr.to_string());

        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(unsupported());
        }

        let minute: u32 = fields[0].parse().map_err(|_| unsupported())?;
        let hour: u32 = fields[1].parse().map_err(|_| unsupported())?;
        if minute > 59 || hour > 23 {
            return Err(unsupported());
        }

        if fields[2..].iter().any(|f| *f != "*") {
            return Err(unsupported());
        }

        Ok(CronSchedule { minute, hour })
    }
}

/// Reject schedules that cannot be computed, before the job row exists.
pub fn validate_schedule(
    kind: ScheduleKind,
    cron_expression: Option<&str>,
) -> Result<(), ScheduleError> {
    match kind {
        ScheduleKind::Cron => {
            let expr = cron_expression
                .ok_or_else(|| ScheduleError::MissingCron(kind.to_string()))?;
            CronSchedule::parse(expr)?;
            Ok(())
        }
        _ => Ok(()),
    }
}

/// Compute the next run strictly after `from`. Manual jobs never have one.
pub fn compute_next_run(
    kind: ScheduleKind,
    cron_expression: Option<&str>,
    from: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    match kind {
        ScheduleKind::Manual => None,
        ScheduleKind::Daily => from
            .date_naive()
            .checked_add_days(Days::new(1))?
            .and_hms_opt(PERIODIC_RUN_HOUR, 0, 0)
            .map(|dt| dt.and_utc()),
        ScheduleKind::Weekly => {
            // Monday = 0; a Monday `from` still schedules the next Monday.
            let ahead = 7 - u64::from(from.weekday().num_days_from_monday());
            from.date_naive()
                .checked_add_days(Days::new(ahead))?
                .and_hms_opt(PERIODIC_RUN_HOUR, 0, 0)
                .map(|dt| dt.and_utc())
        }
        ScheduleKind::Monthly => from
            .date_naive()
            .with_day(1)?
            .checked_add_months(Months::new(1))?
            .and_hms_opt(PERIODIC_RUN_HOUR, 0, 0)
            .map(|dt| dt.and_utc()),
        ScheduleKind::Cron => {
            let schedule = match cron_expression.map(CronSchedule::parse) {
                Some(Ok(schedule)) => schedule,
                Some(Err(e)) => {
                    warn!(error = %e, "Unsupported cron expression on existing job, deferring one hour");
                    return Some(from + chrono::Duration::hours(1));
                }
                None => {
                    warn!("Cron job without expression, deferring one hour");
                    return Some(from + chrono::Duration::hours(1));
                }
            };
            let candidate = from
                .date_naive()
                .and_hms_opt(schedule.hour, schedule.minute, 0)?
                .and_utc();
            if candidate <= from {
                candidate
                    .date_naive()
                    .checked_add_days(Days::new(1))?
                    .and_hms_opt(schedule.hour, schedule.minute, 0)
                    .map(|dt| dt.and_utc())
            } else {
                Some(candidate)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn manual_jobs_have_no_next_run() {
        assert_eq!(compute_next_run(ScheduleKind::Manual, None, Utc::now()), None);
    }

    #[test]
    fn daily_runs_tomorrow_at_nine() {
        // 2026-03-10 is a Tuesday.
        let next = compute_next_run(ScheduleKind::Daily, None, at(2026, 3, 10, 14, 30)).unwrap();
        assert_eq!(next, at(2026, 3, 11, 9, 0));
    }

    #[test]
    fn daily_is_strictly_increasing() {
        let first = compute_next_run(ScheduleKind::Daily, None, at(2026, 3, 10, 9, 0)).unwrap();
        let second = compute_next_run(ScheduleKind::Daily, None, first).unwrap();
        assert!(first > at(2026, 3, 10, 9, 0));
        assert!(second > first);
    }

    #[test]
    fn weekly_runs_next_monday() {
        // A Tuesday maps to the following Monday.
        let next = compute_next_run(ScheduleKind::Weekly, None, at(2026, 3, 10, 9, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 16, 9, 0));
        // A Monday maps a full week ahead, never same-day.
        let next = compute_next_run(ScheduleKind::Weekly, None, at(2026, 3, 16, 8, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 23, 9, 0));
    }

    #[test]
    fn monthly_runs_first_of_next_month() {
        let next = compute_next_run(ScheduleKind::Monthly, None, at(2026, 3, 31, 9, 0)).unwrap();
        assert_eq!(next, at(2026, 4, 1, 9, 0));
        let next = compute_next_run(ScheduleKind::Monthly, None, at(2026, 12, 15, 0, 0)).unwrap();
        assert_eq!(next, at(2027, 1, 1, 9, 0));
    }

    #[test]
    fn cron_before_todays_slot_fires_today() {
        let next =
            compute_next_run(ScheduleKind::Cron, Some("0 9 * * *"), at(2026, 3, 10, 8, 0)).unwrap();
        assert_eq!(next, at(2026, 3, 10, 9, 0));
    }

    #[test]
    fn cron_after_todays_slot_rolls_to_tomorrow() {
        let next =
            compute_next_run(ScheduleKind::Cron, Some("0 9 * * *"), at(2026, 3, 10, 9, 5)).unwrap();
        assert_eq!(next, at(2026, 3, 11, 9, 0));
    }

    #[test]
    fn cron_exactly_at_slot_rolls_forward() {
        let next =
            compute_next_run(ScheduleKind::Cron, Some("30 6 * * *"), at(2026, 3, 10, 6, 30)).unwrap();
        assert_eq!(next, at(2026, 3, 11, 6, 30));
    }

    #[test]
    fn unsupported_cron_is_rejected_at_validation() {
        assert!(CronSchedule::parse("*/5 * * * *").is_err());
        assert!(CronSchedule::parse("0 9 * * 1").is_err());
        assert!(CronSchedule::parse("0 9 1 * *").is_err());
        assert!(CronSchedule::parse("0 24 * * *").is_err());
        assert!(CronSchedule::parse("60 9 * * *").is_err());
        assert!(CronSchedule::parse("0 9 * *").is_err());
        assert!(validate_schedule(ScheduleKind::Cron, None).is_err());
        assert!(validate_schedule(ScheduleKind::Cron, Some("15 4 * * *")).is_ok());
        assert!(validate_schedule(ScheduleKind::Manual, None).is_ok());
    }

    #[test]
    fn unsupported_cron_on_legacy_row_defers_one_hour() {
        let from = at(2026, 3, 10, 12, 0);
        let next = compute_next_run(ScheduleKind::Cron, Some("*/5 * * * *"), from).unwrap();
        assert_eq!(next, at(2026, 3, 10, 13, 0));
    }
}
