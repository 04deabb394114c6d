//! Trial expiry enforcement.
//!
//! The daily scan is the authoritative path. The reminder and removal one-shots scheduled at
//! confirmation call [`enforce_trial`] too, so both paths share one per-record decision and the
//! status written by whichever runs first gates the other.

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};

use crate::context::AppContext;
use crate::jobs::JobKind;
use crate::lifecycle::{messages, LifecycleError};
use crate::subscriber::{PaymentStatus, SubscriberId, SubscriberRecord, SubscriberUpdate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialAction {
    Remind,
    Revoke,
    Nothing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub scanned: usize,
    pub reminded: usize,
    pub revoked: usize,
    pub failed: usize,
}

/// Remind while `0 < trial_end - now <= reminder_window`; revoke once `trial_end <= now`.
pub fn decide(
    record: &SubscriberRecord,
    now: DateTime<Utc>,
    reminder_window: Duration,
) -> TrialAction {
    let Some(trial_end) = record.trial_end else {
        return TrialAction::Nothing;
    };
    match record.payment_status {
        PaymentStatus::TrialActive | PaymentStatus::PendingPaymentAfterTrial
            if trial_end <= now =>
        {
            TrialAction::Revoke
        }
        PaymentStatus::TrialActive if trial_end - now <= reminder_window => TrialAction::Remind,
        _ => TrialAction::Nothing,
    }
}

/// Re-read one subscriber under its lock and apply whatever the trial policy requires.
pub async fn enforce_trial(
    ctx: &AppContext,
    id: SubscriberId,
    now: DateTime<Utc>,
) -> Result<TrialAction, LifecycleError> {
    let _guard = ctx.locks.lock(id).await;
    let Some(record) = ctx.store.get(id)? else {
        warn!("trial check for unknown subscriber {}", id);
        return Ok(TrialAction::Nothing);
    };
    let action = decide(&record, now, ctx.settings.reminder_window);
    match action {
        TrialAction::Remind => remind(ctx, &record, now).await?,
        TrialAction::Revoke => revoke(ctx, &record, now).await?,
        TrialAction::Nothing => {}
    }
    Ok(action)
}

async fn remind(
    ctx: &AppContext,
    record: &SubscriberRecord,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let Some(trial_end) = record.trial_end else {
        return Ok(());
    };
    // Status first: a failed send must not let the next scan remind again.
    ctx.store.update(
        record.id,
        &SubscriberUpdate::payment(PaymentStatus::PendingPaymentAfterTrial),
        now,
    )?;
    ctx.jobs
        .cancel(&JobKind::TrialReminderBridge.job_name(record.id));
    ctx.notifier
        .send_message(record.id, &messages::trial_reminder(&ctx.settings, trial_end))
        .await?;
    info!("reminded subscriber {} that the trial ends {}", record.id, trial_end);
    Ok(())
}

async fn revoke(
    ctx: &AppContext,
    record: &SubscriberRecord,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    if let Err(err) = ctx.notifier.revoke_access(record.id).await {
        // The record still expires; the channel membership is reconciled by hand.
        error!("removing subscriber {} failed: {}", record.id, err);
        ctx.notify_operator(&messages::operator_revoke_failed(
            record.id,
            &record.display_name,
            &err.to_string(),
        ))
        .await;
    }
    ctx.store.update(
        record.id,
        &SubscriberUpdate::payment(PaymentStatus::ExpiredNoPayment),
        now,
    )?;
    ctx.jobs.cancel_kinds(
        record.id,
        &[JobKind::TrialReminderBridge, JobKind::RemovalBridge],
    );
    info!("trial of subscriber {} expired", record.id);
    ctx.notifier
        .send_message(record.id, &messages::trial_expired(&ctx.settings))
        .await?;
    Ok(())
}

/// One pass over every subscriber with a running or lapsed trial. A failure on one record is
/// counted and the pass continues.
pub async fn scan_trials(
    ctx: &AppContext,
    now: DateTime<Utc>,
) -> Result<ScanSummary, LifecycleError> {
    let candidates = ctx.store.list_by_payment_status(&[
        PaymentStatus::TrialActive,
        PaymentStatus::PendingPaymentAfterTrial,
    ])?;

    let mut summary = ScanSummary::default();
    for candidate in candidates {
        summary.scanned += 1;
        match enforce_trial(ctx, candidate.id, now).await {
            Ok(TrialAction::Remind) => summary.reminded += 1,
            Ok(TrialAction::Revoke) => summary.revoked += 1,
            Ok(TrialAction::Nothing) => {}
            Err(err) => {
                summary.failed += 1;
                error!("trial check for subscriber {} failed: {}", candidate.id, err);
            }
        }
    }
    Ok(summary)
}
