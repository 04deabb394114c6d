use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::time::Duration;
use telegram_module::{TelegramClient, TelegramError};
use tracing::{debug, info};

use crate::subscriber::SubscriberId;

/// Single-use credential handed to a subscriber to enter the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessArtifact {
    pub link: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentPost {
    pub caption: String,
    /// PNG bytes posted as a photo with `caption`; text-only when absent.
    pub image: Option<Vec<u8>>,
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("telegram error: {0}")]
    Telegram(#[from] TelegramError),
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

/// Outbound side of the chat platform as seen by the lifecycle core.
pub trait NotificationChannel: Send + Sync {
    fn send_message<'a>(
        &'a self,
        subscriber_id: SubscriberId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>>;

    fn grant_access<'a>(
        &'a self,
        subscriber_id: SubscriberId,
        label: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<AccessArtifact, NotifyError>>;

    fn revoke_access(&self, subscriber_id: SubscriberId) -> BoxFuture<'_, Result<(), NotifyError>>;

    fn post_content<'a>(&'a self, post: &'a ContentPost) -> BoxFuture<'a, Result<(), NotifyError>>;
}

/// Notification channel backed by the Bot API. Access is managed on one channel.
#[derive(Debug, Clone)]
pub struct TelegramNotifier {
    client: TelegramClient,
    channel_id: i64,
    kick_pause: Duration,
}

impl TelegramNotifier {
    pub fn new(client: TelegramClient, channel_id: i64) -> Self {
        Self {
            client,
            channel_id,
            kick_pause: Duration::from_secs(1),
        }
    }

    pub fn with_kick_pause(mut self, kick_pause: Duration) -> Self {
        self.kick_pause = kick_pause;
        self
    }
}

impl NotificationChannel for TelegramNotifier {
    fn send_message<'a>(
        &'a self,
        subscriber_id: SubscriberId,
        text: &'a str,
    ) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            let message = self.client.send_message(subscriber_id, text).await?;
            debug!(
                "sent message {} to {}",
                message.message_id, subscriber_id
            );
            Ok(())
        })
    }

    fn grant_access<'a>(
        &'a self,
        subscriber_id: SubscriberId,
        label: &'a str,
        expires_at: DateTime<Utc>,
    ) -> BoxFuture<'a, Result<AccessArtifact, NotifyError>> {
        Box::pin(async move {
            let link = self
                .client
                .create_chat_invite_link(self.channel_id, label, expires_at)
                .await?;
            info!(
                "created invite link for subscriber {} expiring {}",
                subscriber_id, expires_at
            );
            Ok(AccessArtifact {
                link: link.invite_link,
                expires_at,
            })
        })
    }

    fn revoke_access(&self, subscriber_id: SubscriberId) -> BoxFuture<'_, Result<(), NotifyError>> {
        Box::pin(async move {
            // Ban then unban: removes the member but lets them rejoin after paying.
            self.client
                .ban_chat_member(self.channel_id, subscriber_id)
                .await?;
            tokio::time::sleep(self.kick_pause).await;
            self.client
                .unban_chat_member(self.channel_id, subscriber_id)
                .await?;
            info!("removed subscriber {} from channel", subscriber_id);
            Ok(())
        })
    }

    fn post_content<'a>(&'a self, post: &'a ContentPost) -> BoxFuture<'a, Result<(), NotifyError>> {
        Box::pin(async move {
            match &post.image {
                Some(image) => {
                    self.client
                        .send_photo(self.channel_id, image.clone(), &post.caption)
                        .await?;
                }
                None => {
                    self.client
                        .send_message(self.channel_id, &post.caption)
                        .await?;
                }
            }
            Ok(())
        })
    }
}
