use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{info, warn};

use crate::content::{self, ContentSource};
use crate::jobs::{FiredJob, JobHandler, JobPayload, JobRegistry};
use crate::lifecycle::{self, LifecycleConfig};
use crate::notify::NotificationChannel;
use crate::payments;
use crate::scanner;
use crate::subscriber::{SubscriberLocks, SubscriberStore};
use crate::BoxError;

/// Everything an entry point needs, built once at startup and shared by reference.
pub struct AppContext {
    pub settings: LifecycleConfig,
    pub store: Arc<dyn SubscriberStore>,
    pub notifier: Arc<dyn NotificationChannel>,
    pub jobs: Arc<JobRegistry>,
    pub locks: SubscriberLocks,
    pub content: Option<Arc<dyn ContentSource>>,
}

impl AppContext {
    pub fn new(
        settings: LifecycleConfig,
        store: Arc<dyn SubscriberStore>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            settings,
            store,
            notifier,
            jobs: Arc::new(JobRegistry::new()),
            locks: SubscriberLocks::new(),
            content: None,
        }
    }

    pub fn with_content(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.content = Some(source);
        self
    }

    /// Message the operator, if one is configured. Failures are only logged.
    pub(crate) async fn notify_operator(&self, text: &str) {
        let Some(admin) = self.settings.admin_user_id else {
            warn!("no operator configured; dropped alert: {}", text);
            return;
        };
        if let Err(err) = self.notifier.send_message(admin, text).await {
            warn!("failed to alert operator {}: {}", admin, err);
        }
    }
}

impl JobHandler for AppContext {
    fn handle<'a>(&'a self, job: &'a FiredJob) -> BoxFuture<'a, Result<(), BoxError>> {
        Box::pin(async move {
            let now = Utc::now();
            match &job.payload {
                JobPayload::DisclaimerWarning { subscriber_id } => {
                    lifecycle::on_disclaimer_warning_fired(self, *subscriber_id, now).await?;
                }
                JobPayload::TrialReminderBridge { subscriber_id }
                | JobPayload::RemovalBridge { subscriber_id } => {
                    scanner::enforce_trial(self, *subscriber_id, now).await?;
                }
                JobPayload::PaymentConfirmation {
                    subscriber_id,
                    reissue_access,
                } => {
                    payments::send_payment_confirmation(self, *subscriber_id, *reissue_access, now)
                        .await?;
                }
                JobPayload::RecurringScan => {
                    let summary = scanner::scan_trials(self, now).await?;
                    info!(
                        "trial scan: scanned={} reminded={} revoked={} failed={}",
                        summary.scanned, summary.reminded, summary.revoked, summary.failed
                    );
                }
                JobPayload::RecurringContentPost => {
                    content::post_next(self).await?;
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::ContentError;
    use crate::jobs::{FiredJob, JobKind};
    use crate::notify::ContentPost;
    use crate::subscriber::{ConfirmationStatus, PaymentStatus};
    use crate::testing::{harness, seed_trial};
    use chrono::{DateTime, Duration};
    use tokio::task::JoinHandle;
    use uuid::Uuid;

    async fn join_all(handles: Vec<JoinHandle<()>>) {
        for handle in handles {
            handle.await.unwrap();
        }
    }

    fn fired(payload: JobPayload, scheduled_for: DateTime<Utc>) -> FiredJob {
        FiredJob {
            id: Uuid::new_v4(),
            name: payload.kind().as_str().to_string(),
            payload,
            scheduled_for,
        }
    }

    struct FixedContent;

    impl ContentSource for FixedContent {
        fn next_post(&self) -> Result<Option<ContentPost>, ContentError> {
            Ok(Some(ContentPost {
                caption: "daily tip".to_string(),
                image: None,
            }))
        }
    }

    #[tokio::test]
    async fn removal_bridge_and_scan_revoke_once() {
        let h = harness();
        let now = Utc::now();
        let end = now - Duration::hours(1);
        seed_trial(&h.ctx, 1, "r@example.com", end - Duration::days(7), end, PaymentStatus::TrialActive);
        h.ctx.jobs.schedule_once(
            JobKind::RemovalBridge.job_name(1),
            end,
            JobPayload::RemovalBridge { subscriber_id: 1 },
        );

        join_all(h.ctx.jobs.tick(now, &h.ctx)).await;
        let summary = scanner::scan_trials(&h.ctx, Utc::now()).await.unwrap();

        assert_eq!(summary.revoked, 0);
        assert_eq!(h.notifier.revokes_of(1), 1);
        let record = h.ctx.store.get(1).unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::ExpiredNoPayment);
    }

    #[tokio::test]
    async fn late_removal_bridge_after_scan_does_nothing() {
        let h = harness();
        let now = Utc::now();
        let end = now - Duration::hours(2);
        seed_trial(&h.ctx, 2, "s@example.com", end - Duration::days(7), end, PaymentStatus::TrialActive);

        let summary = scanner::scan_trials(&h.ctx, now).await.unwrap();
        h.ctx
            .handle(&fired(JobPayload::RemovalBridge { subscriber_id: 2 }, end))
            .await
            .unwrap();

        assert_eq!(summary.revoked, 1);
        assert_eq!(h.notifier.revokes_of(2), 1);
        assert_eq!(h.notifier.messages_to(2).len(), 1);
    }

    #[tokio::test]
    async fn reminder_bridge_and_scan_remind_once() {
        let h = harness();
        let now = Utc::now();
        let end = now + Duration::hours(20);
        seed_trial(&h.ctx, 3, "t@example.com", end - Duration::days(7), end, PaymentStatus::TrialActive);
        h.ctx.jobs.schedule_once(
            JobKind::TrialReminderBridge.job_name(3),
            end - Duration::hours(24),
            JobPayload::TrialReminderBridge { subscriber_id: 3 },
        );

        join_all(h.ctx.jobs.tick(now, &h.ctx)).await;
        let summary = scanner::scan_trials(&h.ctx, Utc::now()).await.unwrap();

        assert_eq!(summary.reminded, 0);
        let sent = h.notifier.messages_to(3);
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("Reminder"));
        let record = h.ctx.store.get(3).unwrap().unwrap();
        assert_eq!(record.payment_status, PaymentStatus::PendingPaymentAfterTrial);
    }

    #[tokio::test]
    async fn due_payment_confirmation_thanks_the_subscriber() {
        let h = harness();
        let now = Utc::now();
        let start = now - Duration::days(2);
        seed_trial(&h.ctx, 4, "u@example.com", start, start + Duration::days(7), PaymentStatus::TrialActive);

        payments::apply_payment(&h.ctx, "u@example.com", "sale-4", now)
            .await
            .unwrap();
        join_all(h.ctx.jobs.tick(now + Duration::seconds(5), &h.ctx)).await;

        assert_eq!(
            h.notifier.messages_to(4),
            vec!["Thank you for subscribing! Your access to the VIP channel continues.".to_string()]
        );
        assert!(h.ctx.jobs.is_empty());
    }

    #[tokio::test]
    async fn due_disclaimer_warning_marks_subscriber_warned() {
        let h = harness();
        let now = Utc::now();
        lifecycle::begin(&h.ctx, 5, "noa", now).await.unwrap();

        join_all(h.ctx.jobs.tick(now + Duration::hours(25), &h.ctx)).await;

        let record = h.ctx.store.get(5).unwrap().unwrap();
        assert_eq!(record.confirmation_status, ConfirmationStatus::WarnedNoResponse);
        assert_eq!(h.notifier.messages_to(5).len(), 2);
    }

    #[tokio::test]
    async fn recurring_jobs_run_scan_and_post_content() {
        let h = harness();
        let now = Utc::now();
        let end = now - Duration::hours(3);
        seed_trial(&h.ctx, 6, "v@example.com", end - Duration::days(7), end, PaymentStatus::TrialActive);
        let ctx = Arc::try_unwrap(h.ctx)
            .ok()
            .unwrap()
            .with_content(Arc::new(FixedContent));

        ctx.handle(&fired(JobPayload::RecurringScan, now)).await.unwrap();
        ctx.handle(&fired(JobPayload::RecurringContentPost, now))
            .await
            .unwrap();

        assert_eq!(h.notifier.revokes_of(6), 1);
        let posts = h.notifier.posts.lock().unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].caption, "daily tip");
    }
}
