mod registry;
mod schedule;
mod types;

pub use registry::{JobHandler, JobRegistry, JobRunnerControl};
pub use types::{
    FiredJob, JobError, JobKind, JobPayload, RecurringSpec, Schedule, ScheduledJob,
};
