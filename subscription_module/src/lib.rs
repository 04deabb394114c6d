pub mod content;
pub mod context;
pub mod jobs;
pub mod lifecycle;
pub mod notify;
pub mod payments;
pub mod scanner;
pub mod service;
pub mod subscriber;

#[cfg(test)]
pub(crate) mod testing;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

pub use context::AppContext;
pub use jobs::{JobHandler, JobKind, JobPayload, JobRegistry, RecurringSpec};
pub use lifecycle::{LifecycleConfig, LifecycleError};
pub use notify::{AccessArtifact, NotificationChannel, TelegramNotifier};
pub use subscriber::{
    ConfirmationStatus, PaymentStatus, SqliteSubscriberStore, SubscriberId, SubscriberRecord,
    SubscriberStore,
};
