use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use super::{
    normalize_email, ConfirmationStatus, PaymentStatus, SubscriberId, SubscriberRecord,
    SubscriberUpdate,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("datetime parse error: {0}")]
    DateTimeParse(#[from] chrono::ParseError),
    #[error("subscriber not found: {0}")]
    NotFound(SubscriberId),
    #[error("invalid status value: {0}")]
    InvalidStatus(String),
}

/// Durable table of subscriber records, keyed by subscriber id.
///
/// The store offers no read-modify-write transactions; callers that need one serialize through
/// [`super::SubscriberLocks`].
pub trait SubscriberStore: Send + Sync {
    fn get(&self, id: SubscriberId) -> Result<Option<SubscriberRecord>, StoreError>;

    /// Create a `PendingDisclaimer`/`TrialPending` row unless one exists. Returns the stored
    /// record and whether it was created by this call.
    fn insert_pending(
        &self,
        id: SubscriberId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(SubscriberRecord, bool), StoreError>;

    /// Apply a field-level update and return the record as stored afterwards.
    fn update(
        &self,
        id: SubscriberId,
        update: &SubscriberUpdate,
        now: DateTime<Utc>,
    ) -> Result<SubscriberRecord, StoreError>;

    fn find_by_email(&self, email: &str) -> Result<Option<SubscriberRecord>, StoreError>;

    fn scan(&self) -> Result<Vec<SubscriberRecord>, StoreError>;

    /// Mark `id` as a paying subscriber for `sale_id`, unless that sale was processed before.
    /// Returns `false` for a sale id already seen, in which case nothing is written.
    fn record_sale(
        &self,
        id: SubscriberId,
        sale_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    fn list_by_payment_status(
        &self,
        statuses: &[PaymentStatus],
    ) -> Result<Vec<SubscriberRecord>, StoreError> {
        Ok(self
            .scan()?
            .into_iter()
            .filter(|record| statuses.contains(&record.payment_status))
            .collect())
    }
}

#[derive(Debug, Clone)]
pub struct SqliteSubscriberStore {
    path: PathBuf,
}

impl SqliteSubscriberStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self { path: path.into() };
        let _ = store.open()?;
        Ok(store)
    }

    fn open(&self) -> Result<Connection, StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.execute_batch(SUBSCRIBERS_SCHEMA)?;
        Ok(conn)
    }

    fn query_records(
        &self,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<SubscriberRecord>, StoreError> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), RawRow::read)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?.into_record()?);
        }
        Ok(records)
    }
}

impl SubscriberStore for SqliteSubscriberStore {
    fn get(&self, id: SubscriberId) -> Result<Option<SubscriberRecord>, StoreError> {
        let conn = self.open()?;
        let row = conn
            .query_row(
                &format!("SELECT {SELECT_COLUMNS} FROM subscribers WHERE telegram_user_id = ?1"),
                params![id],
                RawRow::read,
            )
            .optional()?;
        row.map(RawRow::into_record).transpose()
    }

    fn insert_pending(
        &self,
        id: SubscriberId,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<(SubscriberRecord, bool), StoreError> {
        let conn = self.open()?;
        let stamp = format_datetime(now);
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO subscribers (
                telegram_user_id, display_name, email, disclaimer_sent_at, confirmation_status,
                trial_start, trial_end, payment_status, external_sale_id, paid_at, last_update
             ) VALUES (?1, ?2, NULL, ?3, ?4, NULL, NULL, ?5, NULL, NULL, ?3)",
            params![
                id,
                display_name,
                stamp,
                ConfirmationStatus::PendingDisclaimer.as_str(),
                PaymentStatus::TrialPending.as_str(),
            ],
        )?;
        drop(conn);
        let record = self.get(id)?.ok_or(StoreError::NotFound(id))?;
        Ok((record, inserted == 1))
    }

    fn update(
        &self,
        id: SubscriberId,
        update: &SubscriberUpdate,
        now: DateTime<Utc>,
    ) -> Result<SubscriberRecord, StoreError> {
        let mut sets: Vec<&'static str> = Vec::new();
        let mut values: Vec<Value> = Vec::new();

        if let Some(name) = &update.display_name {
            sets.push("display_name = ?");
            values.push(Value::Text(name.clone()));
        }
        if let Some(email) = &update.email {
            sets.push("email = ?");
            let normalized = normalize_email(email).unwrap_or_else(|| email.trim().to_string());
            values.push(Value::Text(normalized));
        }
        if let Some(status) = update.confirmation_status {
            sets.push("confirmation_status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(status) = update.payment_status {
            sets.push("payment_status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some((start, end)) = update.trial {
            // Once a trial has started its window is fixed.
            sets.push("trial_start = COALESCE(trial_start, ?)");
            values.push(Value::Text(format_datetime(start)));
            sets.push("trial_end = COALESCE(trial_end, ?)");
            values.push(Value::Text(format_datetime(end)));
        }
        sets.push("last_update = MAX(last_update, ?)");
        values.push(Value::Text(format_datetime(now)));
        values.push(Value::Integer(id));

        let sql = format!(
            "UPDATE subscribers SET {} WHERE telegram_user_id = ?",
            sets.join(", ")
        );
        let conn = self.open()?;
        let changed = conn.execute(&sql, params_from_iter(values.iter()))?;
        drop(conn);
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        self.get(id)?.ok_or(StoreError::NotFound(id))
    }

    fn find_by_email(&self, email: &str) -> Result<Option<SubscriberRecord>, StoreError> {
        let Some(normalized) = normalize_email(email) else {
            return Ok(None);
        };
        let mut records = self.query_records(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM subscribers
                 WHERE email = ?1
                 ORDER BY last_update DESC
                 LIMIT 1"
            ),
            &[Value::Text(normalized)],
        )?;
        Ok(records.pop())
    }

    fn scan(&self) -> Result<Vec<SubscriberRecord>, StoreError> {
        self.query_records(
            &format!("SELECT {SELECT_COLUMNS} FROM subscribers ORDER BY telegram_user_id"),
            &[],
        )
    }

    fn record_sale(
        &self,
        id: SubscriberId,
        sale_id: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut conn = self.open()?;
        let stamp = format_datetime(now);
        let tx = conn.transaction()?;
        let inserted = tx.execute(
            "INSERT OR IGNORE INTO processed_sales (sale_id, telegram_user_id, applied_at)
             VALUES (?1, ?2, ?3)",
            params![sale_id, id, stamp],
        )?;
        if inserted == 0 {
            return Ok(false);
        }
        let changed = tx.execute(
            "UPDATE subscribers
             SET payment_status = ?1, external_sale_id = ?2, paid_at = ?3,
                 last_update = MAX(last_update, ?3)
             WHERE telegram_user_id = ?4",
            params![PaymentStatus::PaidSubscriber.as_str(), sale_id, stamp, id],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        tx.commit()?;
        Ok(true)
    }

    fn list_by_payment_status(
        &self,
        statuses: &[PaymentStatus],
    ) -> Result<Vec<SubscriberRecord>, StoreError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; statuses.len()].join(", ");
        let args: Vec<Value> = statuses
            .iter()
            .map(|status| Value::Text(status.as_str().to_string()))
            .collect();
        self.query_records(
            &format!(
                "SELECT {SELECT_COLUMNS} FROM subscribers
                 WHERE payment_status IN ({placeholders})
                 ORDER BY telegram_user_id"
            ),
            &args,
        )
    }
}

const SUBSCRIBERS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS subscribers (
    telegram_user_id INTEGER PRIMARY KEY,
    display_name TEXT NOT NULL,
    email TEXT,
    disclaimer_sent_at TEXT NOT NULL,
    confirmation_status TEXT NOT NULL,
    trial_start TEXT,
    trial_end TEXT,
    payment_status TEXT NOT NULL,
    external_sale_id TEXT,
    paid_at TEXT,
    last_update TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS subscribers_email_idx ON subscribers (email);
CREATE INDEX IF NOT EXISTS subscribers_payment_status_idx ON subscribers (payment_status);
CREATE TABLE IF NOT EXISTS processed_sales (
    sale_id TEXT PRIMARY KEY,
    telegram_user_id INTEGER NOT NULL,
    applied_at TEXT NOT NULL
);
"#;

const SELECT_COLUMNS: &str = "telegram_user_id, display_name, email, disclaimer_sent_at, \
     confirmation_status, trial_start, trial_end, payment_status, external_sale_id, paid_at, \
     last_update";

struct RawRow {
    id: SubscriberId,
    display_name: String,
    email: Option<String>,
    disclaimer_sent_at: String,
    confirmation_status: String,
    trial_start: Option<String>,
    trial_end: Option<String>,
    payment_status: String,
    external_sale_id: Option<String>,
    paid_at: Option<String>,
    last_update: String,
}

impl RawRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            display_name: row.get(1)?,
            email: row.get(2)?,
            disclaimer_sent_at: row.get(3)?,
            confirmation_status: row.get(4)?,
            trial_start: row.get(5)?,
            trial_end: row.get(6)?,
            payment_status: row.get(7)?,
            external_sale_id: row.get(8)?,
            paid_at: row.get(9)?,
            last_update: row.get(10)?,
        })
    }

    fn into_record(self) -> Result<SubscriberRecord, StoreError> {
        Ok(SubscriberRecord {
            id: self.id,
            display_name: self.display_name,
            email: self.email,
            disclaimer_sent_at: parse_datetime(&self.disclaimer_sent_at)?,
            confirmation_status: self.confirmation_status.parse()?,
            trial_start: parse_optional_datetime(self.trial_start.as_deref())?,
            trial_end: parse_optional_datetime(self.trial_end.as_deref())?,
            payment_status: self.payment_status.parse()?,
            external_sale_id: self.external_sale_id,
            paid_at: parse_optional_datetime(self.paid_at.as_deref())?,
            last_update: parse_datetime(&self.last_update)?,
        })
    }
}

// Fixed-width UTC timestamps so SQL MAX() and ORDER BY compare chronologically.
fn format_datetime(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_datetime(value: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

fn parse_optional_datetime(value: Option<&str>) -> Result<Option<DateTime<Utc>>, StoreError> {
    match value {
        Some(raw) => Ok(Some(parse_datetime(raw)?)),
        None => Ok(None),
    }
}
