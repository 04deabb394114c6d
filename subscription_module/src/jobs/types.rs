use chrono::{DateTime, NaiveTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::subscriber::SubscriberId;

/// Typed work carried by a scheduled job; the variant selects the handler branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPayload {
    DisclaimerWarning {
        subscriber_id: SubscriberId,
    },
    TrialReminderBridge {
        subscriber_id: SubscriberId,
    },
    RemovalBridge {
        subscriber_id: SubscriberId,
    },
    PaymentConfirmation {
        subscriber_id: SubscriberId,
        /// Send a fresh access link, for subscribers whose trial had already expired.
        reissue_access: bool,
    },
    RecurringScan,
    RecurringContentPost,
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            Self::DisclaimerWarning { .. } => JobKind::DisclaimerWarning,
            Self::TrialReminderBridge { .. } => JobKind::TrialReminderBridge,
            Self::RemovalBridge { .. } => JobKind::RemovalBridge,
            Self::PaymentConfirmation { .. } => JobKind::PaymentConfirmation,
            Self::RecurringScan => JobKind::RecurringScan,
            Self::RecurringContentPost => JobKind::RecurringContentPost,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    DisclaimerWarning,
    TrialReminderBridge,
    RemovalBridge,
    PaymentConfirmation,
    RecurringScan,
    RecurringContentPost,
}

impl JobKind {
    /// Kinds bound to a single subscriber, in the order they are cleared on cancellation.
    pub const PER_SUBSCRIBER: [JobKind; 4] = [
        JobKind::DisclaimerWarning,
        JobKind::TrialReminderBridge,
        JobKind::RemovalBridge,
        JobKind::PaymentConfirmation,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::DisclaimerWarning => "disclaimer_warning",
            Self::TrialReminderBridge => "trial_reminder",
            Self::RemovalBridge => "removal",
            Self::PaymentConfirmation => "payment_confirmation",
            Self::RecurringScan => "trial_scan",
            Self::RecurringContentPost => "content_post",
        }
    }

    /// Deterministic `{kind}_{subscriberId}` name; at most one pending job per name.
    pub fn job_name(self, subscriber_id: SubscriberId) -> String {
        format!("{}_{}", self.as_str(), subscriber_id)
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecurringSpec {
    /// Every day at a fixed local time.
    Daily { hour: u32, minute: u32 },
    /// Six-field cron expression evaluated in local time.
    Cron { expression: String },
    /// Every `every_minutes` inside a daily local-time window, both ends inclusive.
    Interval {
        every_minutes: u32,
        window_start: NaiveTime,
        window_end: NaiveTime,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Schedule {
    OneShot {
        run_at: DateTime<Utc>,
    },
    Recurring {
        spec: RecurringSpec,
        next_run: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledJob {
    pub id: Uuid,
    pub name: String,
    pub payload: JobPayload,
    pub schedule: Schedule,
    pub created_at: DateTime<Utc>,
}

impl ScheduledJob {
    pub fn next_fire(&self) -> DateTime<Utc> {
        match &self.schedule {
            Schedule::OneShot { run_at } => *run_at,
            Schedule::Recurring { next_run, .. } => *next_run,
        }
    }

    pub(crate) fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_fire() <= now
    }
}

/// A job handed to its handler. One-shots are already gone from the registry by now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FiredJob {
    pub id: Uuid,
    pub name: String,
    pub payload: JobPayload,
    pub scheduled_for: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("cron parse error: {0}")]
    Cron(#[from] cron::error::Error),
    #[error("invalid cron expression (expected 6 fields, got {0})")]
    InvalidCron(usize),
    #[error("no next run available for schedule")]
    NoNextRun,
    #[error("invalid interval window: {0}")]
    InvalidWindow(String),
    #[error("duration out of range")]
    DurationOutOfRange,
}
