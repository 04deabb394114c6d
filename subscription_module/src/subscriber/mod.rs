mod locks;
mod store;

pub use locks::SubscriberLocks;
pub use store::{SqliteSubscriberStore, StoreError, SubscriberStore};

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;

/// Chat-platform user id; also the chat id of the subscriber's private conversation.
pub type SubscriberId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConfirmationStatus {
    PendingDisclaimer,
    Confirmed,
    WarnedNoResponse,
    Cancelled,
}

impl ConfirmationStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PendingDisclaimer => "pending_disclaimer",
            Self::Confirmed => "confirmed",
            Self::WarnedNoResponse => "warned_no_response",
            Self::Cancelled => "cancelled",
        }
    }

    /// Still waiting for the disclaimer to be acknowledged.
    pub fn is_awaiting_confirmation(self) -> bool {
        matches!(self, Self::PendingDisclaimer | Self::WarnedNoResponse)
    }

    /// Allowed moves: pending -> confirmed/warned, warned -> confirmed, non-terminal -> cancelled.
    pub fn can_transition_to(self, next: ConfirmationStatus) -> bool {
        use ConfirmationStatus::*;
        matches!(
            (self, next),
            (PendingDisclaimer, Confirmed)
                | (PendingDisclaimer, WarnedNoResponse)
                | (WarnedNoResponse, Confirmed)
                | (PendingDisclaimer, Cancelled)
                | (WarnedNoResponse, Cancelled)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PaymentStatus {
    TrialPending,
    TrialActive,
    PendingPaymentAfterTrial,
    PaidSubscriber,
    ExpiredNoPayment,
}

impl PaymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TrialPending => "trial_pending",
            Self::TrialActive => "trial_active",
            Self::PendingPaymentAfterTrial => "pending_payment_after_trial",
            Self::PaidSubscriber => "paid_subscriber",
            Self::ExpiredNoPayment => "expired_no_payment",
        }
    }

    /// Statuses that `/start` treats as "already registered and active".
    pub fn is_active(self) -> bool {
        matches!(self, Self::TrialActive | Self::PaidSubscriber)
    }
}

impl fmt::Display for ConfirmationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConfirmationStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending_disclaimer" => Ok(Self::PendingDisclaimer),
            "confirmed" => Ok(Self::Confirmed),
            "warned_no_response" => Ok(Self::WarnedNoResponse),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

impl FromStr for PaymentStatus {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "trial_pending" => Ok(Self::TrialPending),
            "trial_active" => Ok(Self::TrialActive),
            "pending_payment_after_trial" => Ok(Self::PendingPaymentAfterTrial),
            "paid_subscriber" => Ok(Self::PaidSubscriber),
            "expired_no_payment" => Ok(Self::ExpiredNoPayment),
            other => Err(StoreError::InvalidStatus(other.to_string())),
        }
    }
}

/// One row of the subscriber table. Rows are never deleted.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberRecord {
    pub id: SubscriberId,
    pub display_name: String,
    pub email: Option<String>,
    pub disclaimer_sent_at: DateTime<Utc>,
    pub confirmation_status: ConfirmationStatus,
    pub trial_start: Option<DateTime<Utc>>,
    pub trial_end: Option<DateTime<Utc>>,
    pub payment_status: PaymentStatus,
    pub external_sale_id: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub last_update: DateTime<Utc>,
}

/// Field-level update; `None` leaves the stored value untouched. Sale fields are written
/// only by [`SubscriberStore::record_sale`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubscriberUpdate {
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub confirmation_status: Option<ConfirmationStatus>,
    pub payment_status: Option<PaymentStatus>,
    /// `(trial_start, trial_end)`; ignored if the trial was already started.
    pub trial: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl SubscriberUpdate {
    pub fn confirmation(status: ConfirmationStatus) -> Self {
        Self {
            confirmation_status: Some(status),
            ..Self::default()
        }
    }

    pub fn payment(status: PaymentStatus) -> Self {
        Self {
            payment_status: Some(status),
            ..Self::default()
        }
    }
}

/// Lowercase and trim an email so it can serve as the payment join key.
pub fn normalize_email(raw: &str) -> Option<String> {
    let value = raw.trim().to_lowercase();
    let (local, domain) = value.split_once('@')?;
    if local.is_empty() || domain.is_empty() {
        return None;
    }
    Some(value)
}
