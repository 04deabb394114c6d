use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use cron::Schedule as CronSchedule;
use std::str::FromStr;

use super::types::{JobError, RecurringSpec};

pub(crate) fn validate_cron_expression(expression: &str) -> Result<(), JobError> {
    let fields = expression.split_whitespace().count();
    if fields != 6 {
        return Err(JobError::InvalidCron(fields));
    }
    Ok(())
}

/// Next cron firing strictly after `after`, with the expression read in local time.
pub(crate) fn next_run_after(
    expression: &str,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, JobError> {
    validate_cron_expression(expression)?;
    let schedule = CronSchedule::from_str(expression)?;
    schedule
        .after(&after.with_timezone(&Local))
        .next()
        .map(|next| next.with_timezone(&Utc))
        .ok_or(JobError::NoNextRun)
}

impl RecurringSpec {
    pub fn daily(hour: u32, minute: u32) -> Self {
        Self::Daily { hour, minute }
    }

    pub fn validate(&self) -> Result<(), JobError> {
        match self {
            Self::Daily { hour, minute } => {
                if *hour > 23 || *minute > 59 {
                    return Err(JobError::InvalidWindow(format!(
                        "{}:{:02} is not a time of day",
                        hour, minute
                    )));
                }
                Ok(())
            }
            Self::Cron { expression } => {
                validate_cron_expression(expression)?;
                CronSchedule::from_str(expression)?;
                Ok(())
            }
            Self::Interval {
                every_minutes,
                window_start,
                window_end,
            } => {
                if *every_minutes == 0 {
                    return Err(JobError::InvalidWindow(
                        "interval must be at least one minute".to_string(),
                    ));
                }
                if window_start > window_end {
                    return Err(JobError::InvalidWindow(format!(
                        "{} is after {}",
                        window_start, window_end
                    )));
                }
                Ok(())
            }
        }
    }

    /// First firing strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>) -> Result<DateTime<Utc>, JobError> {
        self.validate()?;
        match self {
            Self::Daily { hour, minute } => {
                next_run_after(&format!("0 {} {} * * *", minute, hour), after)
            }
            Self::Cron { expression } => next_run_after(expression, after),
            Self::Interval {
                every_minutes,
                window_start,
                window_end,
            } => next_interval_slot(*every_minutes, *window_start, *window_end, after),
        }
    }
}

fn next_interval_slot(
    every_minutes: u32,
    window_start: NaiveTime,
    window_end: NaiveTime,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, JobError> {
    let step = chrono::Duration::minutes(i64::from(every_minutes));
    let today = after.with_timezone(&Local).date_naive();
    for offset in 0..=2u64 {
        let date = today
            .checked_add_days(Days::new(offset))
            .ok_or(JobError::DurationOutOfRange)?;
        let end = date.and_time(window_end);
        let mut slot = date.and_time(window_start);
        while slot <= end {
            // Slots that fall into a DST gap do not exist locally and are skipped.
            if let Some(local) = Local.from_local_datetime(&slot).earliest() {
                let candidate = local.with_timezone(&Utc);
                if candidate > after {
                    return Ok(candidate);
                }
            }
            slot += step;
        }
    }
    Err(JobError::NoNextRun)
}
