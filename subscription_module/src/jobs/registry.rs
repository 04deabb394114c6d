use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::types::{FiredJob, JobError, JobKind, JobPayload, RecurringSpec, Schedule, ScheduledJob};
use crate::subscriber::SubscriberId;
use crate::BoxError;

/// Runs fired jobs. The registry does not own its handler; it is passed to `tick`.
pub trait JobHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, job: &'a FiredJob) -> BoxFuture<'a, Result<(), BoxError>>;
}

/// In-memory named job table.
///
/// Names are unique: scheduling under an existing name replaces the pending job, so a
/// subscriber never has two jobs of one kind. Nothing here survives a restart.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: Mutex<HashMap<String, ScheduledJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn jobs(&self) -> MutexGuard<'_, HashMap<String, ScheduledJob>> {
        self.jobs.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn schedule_once(
        &self,
        name: impl Into<String>,
        run_at: DateTime<Utc>,
        payload: JobPayload,
    ) -> Uuid {
        let name = name.into();
        let job = ScheduledJob {
            id: Uuid::new_v4(),
            name: name.clone(),
            payload,
            schedule: Schedule::OneShot { run_at },
            created_at: Utc::now(),
        };
        let id = job.id;
        if self.jobs().insert(name.clone(), job).is_some() {
            debug!("replaced pending job {} (runs at {})", name, run_at);
        } else {
            debug!("scheduled job {} at {}", name, run_at);
        }
        id
    }

    pub fn schedule_in(
        &self,
        name: impl Into<String>,
        delay: Duration,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Result<Uuid, JobError> {
        let delay = chrono::Duration::from_std(delay).map_err(|_| JobError::DurationOutOfRange)?;
        let run_at = now
            .checked_add_signed(delay)
            .ok_or(JobError::DurationOutOfRange)?;
        Ok(self.schedule_once(name, run_at, payload))
    }

    /// Install a recurring job and return its first firing time.
    pub fn schedule_recurring(
        &self,
        name: impl Into<String>,
        spec: RecurringSpec,
        payload: JobPayload,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, JobError> {
        let next_run = spec.next_after(now)?;
        let name = name.into();
        info!("recurring job {} first runs at {}", name, next_run);
        self.jobs().insert(
            name.clone(),
            ScheduledJob {
                id: Uuid::new_v4(),
                name,
                payload,
                schedule: Schedule::Recurring { spec, next_run },
                created_at: now,
            },
        );
        Ok(next_run)
    }

    /// Remove a pending job. Cancelling an absent name is not an error.
    pub fn cancel(&self, name: &str) -> bool {
        let removed = self.jobs().remove(name).is_some();
        if removed {
            debug!("cancelled job {}", name);
        }
        removed
    }

    pub fn cancel_kinds(&self, subscriber_id: SubscriberId, kinds: &[JobKind]) -> usize {
        let mut jobs = self.jobs();
        kinds
            .iter()
            .filter(|kind| jobs.remove(&kind.job_name(subscriber_id)).is_some())
            .count()
    }

    pub fn cancel_for_subscriber(&self, subscriber_id: SubscriberId) -> usize {
        self.cancel_kinds(subscriber_id, &JobKind::PER_SUBSCRIBER)
    }

    pub fn pending(&self, name: &str) -> Option<ScheduledJob> {
        self.jobs().get(name).cloned()
    }

    pub fn pending_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.jobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs().is_empty()
    }

    /// Pull every job due at `now`: one-shots leave the table and recurring jobs advance,
    /// both before any handler runs.
    pub fn take_due(&self, now: DateTime<Utc>) -> Vec<FiredJob> {
        let mut jobs = self.jobs();
        let mut due: Vec<String> = jobs
            .values()
            .filter(|job| job.is_due(now))
            .map(|job| job.name.clone())
            .collect();
        due.sort_by_key(|name| jobs.get(name).map(ScheduledJob::next_fire));

        let mut fired = Vec::with_capacity(due.len());
        for name in due {
            let Some(job) = jobs.get_mut(&name) else {
                continue;
            };
            let scheduled_for = job.next_fire();
            let fire = FiredJob {
                id: job.id,
                name: job.name.clone(),
                payload: job.payload.clone(),
                scheduled_for,
            };
            let finished = match &mut job.schedule {
                Schedule::OneShot { .. } => true,
                Schedule::Recurring { spec, next_run } => match spec.next_after(now) {
                    Ok(next) => {
                        *next_run = next;
                        false
                    }
                    Err(err) => {
                        warn!("dropping recurring job {}: {}", name, err);
                        true
                    }
                },
            };
            if finished {
                jobs.remove(&name);
            }
            fired.push(fire);
        }
        fired
    }

    /// Dispatch due jobs, one task each. Failures are logged and never retried.
    pub fn tick<H>(&self, now: DateTime<Utc>, handler: &Arc<H>) -> Vec<JoinHandle<()>>
    where
        H: JobHandler + ?Sized,
    {
        self.take_due(now)
            .into_iter()
            .map(|job| {
                let handler = Arc::clone(handler);
                tokio::spawn(async move {
                    info!(
                        "job {} firing (kind={}, scheduled_for={})",
                        job.name,
                        job.payload.kind(),
                        job.scheduled_for
                    );
                    if let Err(err) = handler.handle(&job).await {
                        error!("job {} failed: {}", job.name, err);
                    }
                })
            })
            .collect()
    }

    pub async fn run_loop<H>(&self, handler: Arc<H>, poll_interval: Duration, stop_flag: &AtomicBool)
    where
        H: JobHandler + ?Sized,
    {
        while !stop_flag.load(Ordering::Relaxed) {
            self.tick(Utc::now(), &handler);
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub fn start<H>(self: &Arc<Self>, handler: Arc<H>, poll_interval: Duration) -> JobRunnerControl
    where
        H: JobHandler + ?Sized,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let registry = Arc::clone(self);
        let loop_stop = Arc::clone(&stop);
        let handle = tokio::spawn(async move {
            registry.run_loop(handler, poll_interval, &loop_stop).await;
            info!("job runner stopped");
        });
        JobRunnerControl {
            stop,
            handle: Some(handle),
        }
    }
}

pub struct JobRunnerControl {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl JobRunnerControl {
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
    }

    pub async fn stop_and_join(&mut self) {
        self.stop();
        if let Some(handle) = self.handle.take() {
            if let Err(err) = handle.await {
                warn!("job runner task ended abnormally: {}", err);
            }
        }
    }
}
