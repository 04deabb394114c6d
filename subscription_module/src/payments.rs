use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::context::AppContext;
use crate::jobs::{JobKind, JobPayload};
use crate::lifecycle::{messages, LifecycleError};
use crate::subscriber::{PaymentStatus, SubscriberId};

const CONFIRMATION_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Applied {
        subscriber_id: SubscriberId,
        reissue_access: bool,
    },
    /// The sale id was processed before; nothing was written or scheduled.
    Duplicate { subscriber_id: SubscriberId },
    UnknownEmail,
}

/// Record a provider-confirmed sale against the subscriber who registered `email`.
///
/// Every processed sale id is remembered, so replays of any earlier sale are no-ops. Applying
/// a sale cancels the trial bridges and queues a confirmation message.
pub async fn apply_payment(
    ctx: &AppContext,
    email: &str,
    sale_id: &str,
    now: DateTime<Utc>,
) -> Result<PaymentOutcome, LifecycleError> {
    let sale_id = sale_id.trim();
    let Some(found) = ctx.store.find_by_email(email)? else {
        warn!("payment {} for unknown email {}", sale_id, email);
        return Ok(PaymentOutcome::UnknownEmail);
    };
    let id = found.id;

    let _guard = ctx.locks.lock(id).await;
    let Some(record) = ctx.store.get(id)? else {
        return Ok(PaymentOutcome::UnknownEmail);
    };
    let reissue_access = record.payment_status == PaymentStatus::ExpiredNoPayment;
    if !ctx.store.record_sale(id, sale_id, now)? {
        info!("ignoring replayed sale {} for subscriber {}", sale_id, id);
        return Ok(PaymentOutcome::Duplicate { subscriber_id: id });
    }
    ctx.jobs.cancel_kinds(
        id,
        &[JobKind::TrialReminderBridge, JobKind::RemovalBridge],
    );
    ctx.jobs.schedule_in(
        JobKind::PaymentConfirmation.job_name(id),
        CONFIRMATION_DELAY,
        JobPayload::PaymentConfirmation {
            subscriber_id: id,
            reissue_access,
        },
        now,
    )?;
    info!("subscriber {} paid (sale {})", id, sale_id);
    Ok(PaymentOutcome::Applied {
        subscriber_id: id,
        reissue_access,
    })
}

/// Thank a paying subscriber, with a fresh invite link if their trial access had lapsed.
pub async fn send_payment_confirmation(
    ctx: &AppContext,
    id: SubscriberId,
    reissue_access: bool,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let _guard = ctx.locks.lock(id).await;
    let Some(record) = ctx.store.get(id)? else {
        warn!("payment confirmation for unknown subscriber {}", id);
        return Ok(());
    };
    if record.payment_status != PaymentStatus::PaidSubscriber {
        debug!("subscriber {} is {}; no confirmation sent", id, record.payment_status);
        return Ok(());
    }

    if !reissue_access {
        ctx.notifier
            .send_message(id, &messages::payment_thanks(&ctx.settings))
            .await?;
        return Ok(());
    }

    let expires_at = now + ctx.settings.invite_grace;
    match ctx
        .notifier
        .grant_access(id, &record.display_name, expires_at)
        .await
    {
        Ok(artifact) => {
            ctx.notifier
                .send_message(
                    id,
                    &messages::payment_thanks_with_link(&ctx.settings, &artifact.link),
                )
                .await?;
        }
        Err(err) => {
            error!("invite link for paying subscriber {} failed: {}", id, err);
            ctx.notifier
                .send_message(id, &messages::payment_thanks(&ctx.settings))
                .await?;
            ctx.notify_operator(&messages::operator_access_failed(
                id,
                &record.display_name,
                &err.to_string(),
            ))
            .await;
        }
    }
    Ok(())
}
