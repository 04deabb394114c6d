use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::context::AppContext;
use crate::lifecycle::LifecycleConfig;
use crate::notify::{AccessArtifact, ContentPost, NotificationChannel, NotifyError};
use crate::subscriber::{
    ConfirmationStatus, PaymentStatus, SqliteSubscriberStore, SubscriberId, SubscriberRecord,
    SubscriberStore, SubscriberUpdate,
};

/// Notification channel that records every call instead of talking to Telegram.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    pub messages: Mutex<Vec<(SubscriberId, String)>>,
    pub grants: Mutex<Vec<(SubscriberId, DateTime<Utc>)>>,
    pub revokes: Mutex<Vec<SubscriberId>>,
    pub posts: Mutex<Vec<ContentPost>>,
    pub fail_send: AtomicBool,
    pub fail_grant: AtomicBool,
    pub fail_revoke: AtomicBool,
}

impl RecordingNotifier {
    pub fn messages_to(&self, id: SubscriberId) -> Vec<String> {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| *to == id)
            .map(|(_, text)| text.clone())
            .collect()
    }

    pub fn revokes_of(&self, id: SubscriberId) -> usize {
        self.revokes
            .lock()
            .unwrap()
            .iter()
            .filter(|revoked| **revoked == id)
            .count()
    }

    pub fn grant_count(&self) -> usize {
        self.grants.lock().unwrap().len()
    }
}

impl NotificationChannel for RecordingNotifier {
    fn send_message<'a>(
        &'a self,
        subscriber_id: SubscriberId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            if self.fail_send.load(Ordering::SeqCst) {
                return Err(NotifyError::Unavailable("chat not reachable".to_string()));
            }
            self.messages
                .lock()
                .unwrap()
                .push((subscriber_id, text.to_string()));
            Ok(())
        })
    }

    fn grant_access<'a>(
        &'a self,
        subscriber_id: SubscriberId,
        _label: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<AccessArtifact, NotifyError>> {
        Box::pin(async move {
            if self.fail_grant.load(Ordering::SeqCst) {
                return Err(NotifyError::Unavailable("invite links disabled".to_string()));
            }
            self.grants.lock().unwrap().push((subscriber_id, expires_at));
            Ok(AccessArtifact {
                link: format!("https://t.me/+invite{}", subscriber_id),
                expires_at,
            })
        })
    }

    fn revoke_access(&self, subscriber_id: SubscriberId) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            self.revokes.lock().unwrap().push(subscriber_id);
            if self.fail_revoke.load(Ordering::SeqCst) {
                return Err(NotifyError::Unavailable("bot is not an admin".to_string()));
            }
            Ok(())
        })
    }

    fn post_content<'a>(&'a self, post: &'a ContentPost) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            self.posts.lock().unwrap().push(post.clone());
            Ok(())
        })
    }
}

pub(crate) struct Harness {
    pub ctx: Arc<AppContext>,
    pub notifier: Arc<RecordingNotifier>,
    _temp: TempDir,
}

pub(crate) const ADMIN_ID: SubscriberId = 999;

pub(crate) fn harness() -> Harness {
    harness_with(LifecycleConfig {
        admin_user_id: Some(ADMIN_ID),
        payment_link: Some("https://pay.example.com/vip".to_string()),
        ..LifecycleConfig::default()
    })
}

pub(crate) fn harness_with(settings: LifecycleConfig) -> Harness {
    let temp = TempDir::new().unwrap();
    let store = SqliteSubscriberStore::new(temp.path().join("subscribers.db")).unwrap();
    let notifier = Arc::new(RecordingNotifier::default());
    let ctx = AppContext::new(settings, Arc::new(store), notifier.clone());
    Harness {
        ctx: Arc::new(ctx),
        notifier,
        _temp: temp,
    }
}

/// Store a confirmed subscriber whose trial runs from `start` to `end`.
pub(crate) fn seed_trial(
    ctx: &AppContext,
    id: SubscriberId,
    email: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    status: PaymentStatus,
) -> SubscriberRecord {
    ctx.store
        .insert_pending(id, &format!("user{}", id), start)
        .unwrap();
    ctx.store
        .update(
            id,
            &SubscriberUpdate {
                email: Some(email.to_string()),
                confirmation_status: Some(ConfirmationStatus::Confirmed),
                payment_status: Some(status),
                trial: Some((start, end)),
                ..SubscriberUpdate::default()
            },
            start,
        )
        .unwrap()
}
