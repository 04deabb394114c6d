//! Per-subscriber conversation flow: disclaimer, confirmation, trial start and cancellation.
//!
//! The stored `confirmation_status` is the durable projection of the conversation; every
//! operation takes the subscriber's lock and re-reads the record before acting.

pub(crate) mod messages;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::jobs::{JobError, JobKind, JobPayload};
use crate::notify::{AccessArtifact, NotifyError};
use crate::subscriber::{
    ConfirmationStatus, PaymentStatus, StoreError, SubscriberId, SubscriberUpdate,
};

pub const DEFAULT_CONFIRMATION_KEYWORDS: [&str; 6] = ["מאשר", "מקובל", "אישור", "ok", "yes", "כן"];

#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub trial_length: Duration,
    pub warning_delay: Duration,
    pub reminder_window: Duration,
    /// Extra validity of the invite link past the end of the trial.
    pub invite_grace: Duration,
    pub keywords: Vec<String>,
    pub channel_name: String,
    pub payment_link: Option<String>,
    pub admin_user_id: Option<i64>,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            trial_length: Duration::days(7),
            warning_delay: Duration::hours(24),
            reminder_window: Duration::hours(24),
            invite_grace: Duration::days(2),
            keywords: DEFAULT_CONFIRMATION_KEYWORDS
                .iter()
                .map(|keyword| keyword.to_string())
                .collect(),
            channel_name: "the VIP channel".to_string(),
            payment_link: None,
            admin_user_id: None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("notification error: {0}")]
    Notify(#[from] NotifyError),
    #[error("job error: {0}")]
    Jobs(#[from] JobError),
    #[error("confirmation status cannot move from {from} to {to}")]
    InvalidTransition {
        from: ConfirmationStatus,
        to: ConfirmationStatus,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConfirmationParseError {
    #[error("no email address in message")]
    MissingEmail,
    #[error("no confirmation keyword in message")]
    MissingKeyword,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BeginOutcome {
    Started,
    DisclaimerResent,
    AlreadyActive,
    Cancelled,
    PaymentRequired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    Confirmed {
        trial_end: DateTime<Utc>,
        artifact: AccessArtifact,
    },
    /// The confirmation is stored but no invite link was delivered.
    AccessGrantFailed { trial_end: DateTime<Utc> },
    Reprompted(ConfirmationParseError),
    NotStarted,
    NotAwaiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled { cleared_jobs: usize },
    AlreadyCancelled,
    NotStarted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningOutcome {
    Warned,
    Skipped,
}

fn email_pattern() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"[\w.-]+@[\w.-]+\.\w+").expect("email pattern compiles"))
}

/// Extract the lowercased email from a confirmation message.
///
/// Both an email address and one of `keywords` must be present. Keywords match as a
/// case-insensitive substring of the text around the address, never inside it.
pub fn parse_confirmation(text: &str, keywords: &[String]) -> Result<String, ConfirmationParseError> {
    let found = email_pattern()
        .find(text)
        .ok_or(ConfirmationParseError::MissingEmail)?;
    let email = found.as_str().to_lowercase();
    let remainder = format!("{} {}", &text[..found.start()], &text[found.end()..]).to_lowercase();
    let confirmed = keywords.iter().any(|keyword| {
        let keyword = keyword.trim().to_lowercase();
        !keyword.is_empty() && remainder.contains(&keyword)
    });
    if confirmed {
        Ok(email)
    } else {
        Err(ConfirmationParseError::MissingKeyword)
    }
}

fn ensure_transition(
    from: ConfirmationStatus,
    to: ConfirmationStatus,
) -> Result<(), LifecycleError> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(LifecycleError::InvalidTransition { from, to })
    }
}

fn schedule_disclaimer_warning(ctx: &AppContext, id: SubscriberId, now: DateTime<Utc>) {
    ctx.jobs.schedule_once(
        JobKind::DisclaimerWarning.job_name(id),
        now + ctx.settings.warning_delay,
        JobPayload::DisclaimerWarning { subscriber_id: id },
    );
}

/// Best-effort one-shots; the daily scan enforces the same decisions if these are lost.
fn schedule_trial_bridges(
    ctx: &AppContext,
    id: SubscriberId,
    trial_end: DateTime<Utc>,
    now: DateTime<Utc>,
) {
    let remind_at = trial_end - ctx.settings.reminder_window;
    if remind_at > now {
        ctx.jobs.schedule_once(
            JobKind::TrialReminderBridge.job_name(id),
            remind_at,
            JobPayload::TrialReminderBridge { subscriber_id: id },
        );
    }
    ctx.jobs.schedule_once(
        JobKind::RemovalBridge.job_name(id),
        trial_end,
        JobPayload::RemovalBridge { subscriber_id: id },
    );
}

/// `/start`: create the record if needed and present the disclaimer.
pub async fn begin(
    ctx: &AppContext,
    id: SubscriberId,
    display_name: &str,
    now: DateTime<Utc>,
) -> Result<BeginOutcome, LifecycleError> {
    let _guard = ctx.locks.lock(id).await;
    let (record, created) = ctx.store.insert_pending(id, display_name, now)?;
    let disclaimer = messages::disclaimer(&ctx.settings, &record.display_name);

    if created {
        info!("new subscriber {} ({})", id, record.display_name);
        schedule_disclaimer_warning(ctx, id, now);
        ctx.notifier.send_message(id, &disclaimer).await?;
        return Ok(BeginOutcome::Started);
    }

    if record.payment_status.is_active() {
        ctx.notifier
            .send_message(id, &messages::already_active(&ctx.settings))
            .await?;
        return Ok(BeginOutcome::AlreadyActive);
    }

    match record.confirmation_status {
        ConfirmationStatus::PendingDisclaimer => {
            schedule_disclaimer_warning(ctx, id, now);
            ctx.notifier.send_message(id, &disclaimer).await?;
            Ok(BeginOutcome::DisclaimerResent)
        }
        ConfirmationStatus::WarnedNoResponse => {
            ctx.notifier.send_message(id, &disclaimer).await?;
            Ok(BeginOutcome::DisclaimerResent)
        }
        ConfirmationStatus::Cancelled => {
            ctx.notifier
                .send_message(id, &messages::cancelled_notice())
                .await?;
            Ok(BeginOutcome::Cancelled)
        }
        ConfirmationStatus::Confirmed => {
            ctx.notifier
                .send_message(id, &messages::payment_required(&ctx.settings))
                .await?;
            Ok(BeginOutcome::PaymentRequired)
        }
    }
}

/// Free text from the subscriber. Confirms the disclaimer and starts the trial when the
/// message carries an email address and a confirmation keyword.
pub async fn on_message(
    ctx: &AppContext,
    id: SubscriberId,
    text: &str,
    now: DateTime<Utc>,
) -> Result<MessageOutcome, LifecycleError> {
    let _guard = ctx.locks.lock(id).await;
    let Some(record) = ctx.store.get(id)? else {
        ctx.notifier.send_message(id, &messages::start_first()).await?;
        return Ok(MessageOutcome::NotStarted);
    };
    if !record.confirmation_status.is_awaiting_confirmation() {
        ctx.notifier
            .send_message(id, &messages::help(&ctx.settings))
            .await?;
        return Ok(MessageOutcome::NotAwaiting);
    }

    let email = match parse_confirmation(text, &ctx.settings.keywords) {
        Ok(email) => email,
        Err(err) => {
            debug!("subscriber {} sent an unusable confirmation: {}", id, err);
            ctx.notifier
                .send_message(id, &messages::invalid_confirmation(&ctx.settings))
                .await?;
            return Ok(MessageOutcome::Reprompted(err));
        }
    };
    ensure_transition(record.confirmation_status, ConfirmationStatus::Confirmed)?;

    let trial_end = now + ctx.settings.trial_length;
    let record = ctx.store.update(
        id,
        &SubscriberUpdate {
            email: Some(email),
            confirmation_status: Some(ConfirmationStatus::Confirmed),
            payment_status: Some(PaymentStatus::TrialActive),
            trial: Some((now, trial_end)),
            ..SubscriberUpdate::default()
        },
        now,
    )?;
    let trial_end = record.trial_end.unwrap_or(trial_end);
    info!("subscriber {} confirmed, trial ends {}", id, trial_end);

    ctx.jobs.cancel(&JobKind::DisclaimerWarning.job_name(id));
    schedule_trial_bridges(ctx, id, trial_end, now);

    let link_expires_at = trial_end + ctx.settings.invite_grace;
    match ctx
        .notifier
        .grant_access(id, &record.display_name, link_expires_at)
        .await
    {
        Ok(artifact) => {
            let welcome =
                messages::welcome(&ctx.settings, &artifact.link, trial_end, link_expires_at);
            ctx.notifier.send_message(id, &welcome).await?;
            Ok(MessageOutcome::Confirmed {
                trial_end,
                artifact,
            })
        }
        Err(err) => {
            error!("invite link for subscriber {} failed: {}", id, err);
            if let Err(send_err) = ctx
                .notifier
                .send_message(id, &messages::access_grant_failed())
                .await
            {
                warn!("could not tell subscriber {} about it: {}", id, send_err);
            }
            ctx.notify_operator(&messages::operator_access_failed(
                id,
                &record.display_name,
                &err.to_string(),
            ))
            .await;
            Ok(MessageOutcome::AccessGrantFailed { trial_end })
        }
    }
}

/// `/cancel`: abandon a registration that has not been confirmed. Clears every pending job
/// for the subscriber.
pub async fn cancel(
    ctx: &AppContext,
    id: SubscriberId,
    now: DateTime<Utc>,
) -> Result<CancelOutcome, LifecycleError> {
    let _guard = ctx.locks.lock(id).await;
    let Some(record) = ctx.store.get(id)? else {
        ctx.notifier.send_message(id, &messages::start_first()).await?;
        return Ok(CancelOutcome::NotStarted);
    };

    match record.confirmation_status {
        ConfirmationStatus::Cancelled => {
            ctx.jobs.cancel_for_subscriber(id);
            ctx.notifier
                .send_message(id, &messages::cancelled_notice())
                .await?;
            Ok(CancelOutcome::AlreadyCancelled)
        }
        ConfirmationStatus::Confirmed => {
            ctx.notifier
                .send_message(id, &messages::cancel_refused())
                .await?;
            Err(LifecycleError::InvalidTransition {
                from: ConfirmationStatus::Confirmed,
                to: ConfirmationStatus::Cancelled,
            })
        }
        from => {
            ensure_transition(from, ConfirmationStatus::Cancelled)?;
            ctx.store.update(
                id,
                &SubscriberUpdate::confirmation(ConfirmationStatus::Cancelled),
                now,
            )?;
            let cleared_jobs = ctx.jobs.cancel_for_subscriber(id);
            info!(
                "subscriber {} cancelled ({} pending jobs cleared)",
                id, cleared_jobs
            );
            ctx.notifier.send_message(id, &messages::cancel_ack()).await?;
            Ok(CancelOutcome::Cancelled { cleared_jobs })
        }
    }
}

/// Fired by the registry. Warns only a subscriber still pending, so a late or duplicate
/// firing after confirmation or cancellation does nothing.
pub async fn on_disclaimer_warning_fired(
    ctx: &AppContext,
    id: SubscriberId,
    now: DateTime<Utc>,
) -> Result<WarningOutcome, LifecycleError> {
    let _guard = ctx.locks.lock(id).await;
    let Some(record) = ctx.store.get(id)? else {
        warn!("disclaimer warning fired for unknown subscriber {}", id);
        return Ok(WarningOutcome::Skipped);
    };
    if record.confirmation_status != ConfirmationStatus::PendingDisclaimer {
        debug!(
            "skipping disclaimer warning for {} ({})",
            id, record.confirmation_status
        );
        return Ok(WarningOutcome::Skipped);
    }

    ctx.store.update(
        id,
        &SubscriberUpdate::confirmation(ConfirmationStatus::WarnedNoResponse),
        now,
    )?;
    ctx.notifier
        .send_message(id, &messages::disclaimer_warning(&ctx.settings))
        .await?;
    info!("warned subscriber {} about missing confirmation", id);
    Ok(WarningOutcome::Warned)
}

pub async fn help(ctx: &AppContext, id: SubscriberId) -> Result<(), LifecycleError> {
    ctx.notifier
        .send_message(id, &messages::help(&ctx.settings))
        .await?;
    Ok(())
}
