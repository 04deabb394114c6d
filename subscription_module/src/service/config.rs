use chrono::{Duration as ChronoDuration, NaiveTime};
use std::env;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::lifecycle::LifecycleConfig;

const MAX_SPAN_DAYS: i64 = 3650;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// When channel content is posted, if at all.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContentSchedule {
    Disabled,
    /// Fixed local times every day.
    Times(Vec<NaiveTime>),
    Interval {
        every_minutes: u32,
        window_start: NaiveTime,
        window_end: NaiveTime,
    },
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub telegram_bot_token: String,
    /// Channel whose membership is granted and revoked.
    pub channel_id: i64,
    pub telegram_polling: bool,
    pub subscribers_db_path: PathBuf,
    pub gumroad_product_permalink: Option<String>,
    pub trial_scan_time: NaiveTime,
    pub content_dir: Option<PathBuf>,
    pub content_schedule: ContentSchedule,
    pub job_poll_interval: Duration,
    pub lifecycle: LifecycleConfig,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let host = env_var_non_empty("RUST_SERVICE_HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = parse_env("RUST_SERVICE_PORT", 8000u16)?;
        let telegram_bot_token =
            env_var_non_empty("TELEGRAM_BOT_TOKEN").ok_or(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))?;
        let channel_raw = env_var_non_empty("CHANNEL_ID").ok_or(ConfigError::Missing("CHANNEL_ID"))?;
        let channel_id = channel_raw
            .parse::<i64>()
            .map_err(|_| ConfigError::Invalid {
                key: "CHANNEL_ID",
                value: channel_raw.clone(),
            })?;

        let subscribers_db_path = resolve_path(
            env_var_non_empty("SUBSCRIBERS_DB_PATH")
                .unwrap_or_else(|| "./state/subscribers.db".to_string()),
        )?;
        let trial_scan_time = match env_var_non_empty("TRIAL_SCAN_TIME") {
            Some(raw) => parse_time("TRIAL_SCAN_TIME", &raw)?,
            None => NaiveTime::from_hms_opt(9, 5, 0).ok_or(ConfigError::Invalid {
                key: "TRIAL_SCAN_TIME",
                value: "09:05".to_string(),
            })?,
        };
        let content_dir = env_var_non_empty("CONTENT_DIR")
            .map(resolve_path)
            .transpose()?;

        let lifecycle = LifecycleConfig {
            trial_length: parse_span("TRIAL_PERIOD_DAYS", 7, ChronoDuration::try_days)?,
            warning_delay: parse_span("DISCLAIMER_WARNING_HOURS", 24, ChronoDuration::try_hours)?,
            reminder_window: parse_span(
                "TRIAL_REMINDER_WINDOW_HOURS",
                24,
                ChronoDuration::try_hours,
            )?,
            invite_grace: parse_span("INVITE_LINK_GRACE_DAYS", 2, ChronoDuration::try_days)?,
            keywords: env_var_non_empty("CONFIRMATION_KEYWORDS")
                .map(|raw| split_list(&raw))
                .filter(|keywords| !keywords.is_empty())
                .unwrap_or_else(|| LifecycleConfig::default().keywords),
            channel_name: env_var_non_empty("CHANNEL_USERNAME")
                .unwrap_or_else(|| LifecycleConfig::default().channel_name),
            payment_link: env_var_non_empty("PAYMENT_LINK"),
            admin_user_id: env_var_non_empty("ADMIN_USER_ID")
                .map(|raw| {
                    raw.parse::<i64>().map_err(|_| ConfigError::Invalid {
                        key: "ADMIN_USER_ID",
                        value: raw.clone(),
                    })
                })
                .transpose()?,
        };
        if lifecycle.trial_length <= ChronoDuration::zero() {
            return Err(ConfigError::Invalid {
                key: "TRIAL_PERIOD_DAYS",
                value: lifecycle.trial_length.num_days().to_string(),
            });
        }

        Ok(Self {
            host,
            port,
            telegram_bot_token,
            channel_id,
            telegram_polling: env_flag("TELEGRAM_POLLING", true),
            subscribers_db_path,
            gumroad_product_permalink: env_var_non_empty("GUMROAD_PRODUCT_PERMALINK"),
            trial_scan_time,
            content_dir,
            content_schedule: content_schedule_from_env()?,
            job_poll_interval: Duration::from_millis(parse_env("JOB_POLL_INTERVAL_MS", 1000u64)?),
            lifecycle,
        })
    }
}

fn content_schedule_from_env() -> Result<ContentSchedule, ConfigError> {
    if let Some(raw) = env_var_non_empty("CONTENT_POSTING_TIMES") {
        let times = split_list(&raw)
            .iter()
            .map(|value| parse_time("CONTENT_POSTING_TIMES", value))
            .collect::<Result<Vec<_>, _>>()?;
        if !times.is_empty() {
            return Ok(ContentSchedule::Times(times));
        }
    }
    let Some(every_raw) = env_var_non_empty("CONTENT_POST_INTERVAL_MINUTES") else {
        return Ok(ContentSchedule::Disabled);
    };
    let every_minutes = every_raw
        .parse::<u32>()
        .ok()
        .filter(|value| *value > 0)
        .ok_or(ConfigError::Invalid {
            key: "CONTENT_POST_INTERVAL_MINUTES",
            value: every_raw.clone(),
        })?;
    let window = env_var_non_empty("CONTENT_POST_WINDOW").unwrap_or_else(|| "00:00-23:59".to_string());
    let invalid_window = || ConfigError::Invalid {
        key: "CONTENT_POST_WINDOW",
        value: window.clone(),
    };
    let (start, end) = window.split_once('-').ok_or_else(invalid_window)?;
    let window_start = parse_time("CONTENT_POST_WINDOW", start)?;
    let window_end = parse_time("CONTENT_POST_WINDOW", end)?;
    if window_start > window_end {
        return Err(invalid_window());
    }
    Ok(ContentSchedule::Interval {
        every_minutes,
        window_start,
        window_end,
    })
}

fn parse_time(key: &'static str, raw: &str) -> Result<NaiveTime, ConfigError> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").map_err(|_| ConfigError::Invalid {
        key,
        value: raw.to_string(),
    })
}

fn parse_env<T: FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    match env_var_non_empty(key) {
        Some(raw) => raw.parse::<T>().map_err(|_| ConfigError::Invalid { key, value: raw }),
        None => Ok(default),
    }
}

/// Non-negative span of at most ten years, in the unit `to_span` converts from.
fn parse_span(
    key: &'static str,
    default: u32,
    to_span: fn(i64) -> Option<ChronoDuration>,
) -> Result<ChronoDuration, ConfigError> {
    let value = parse_env(key, default)?;
    to_span(i64::from(value))
        .filter(|span| span.num_days() <= MAX_SPAN_DAYS)
        .ok_or(ConfigError::Invalid {
            key,
            value: value.to_string(),
        })
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => default,
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(env::current_dir()?.join(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    const KEYS: [&str; 14] = [
        "TELEGRAM_BOT_TOKEN",
        "CHANNEL_ID",
        "ADMIN_USER_ID",
        "TRIAL_PERIOD_DAYS",
        "DISCLAIMER_WARNING_HOURS",
        "TRIAL_REMINDER_WINDOW_HOURS",
        "CONFIRMATION_KEYWORDS",
        "SUBSCRIBERS_DB_PATH",
        "TRIAL_SCAN_TIME",
        "CONTENT_POSTING_TIMES",
        "CONTENT_POST_INTERVAL_MINUTES",
        "CONTENT_POST_WINDOW",
        "TELEGRAM_POLLING",
        "RUST_SERVICE_PORT",
    ];

    struct EnvGuard {
        saved: Vec<(&'static str, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            let saved = KEYS.iter().map(|key| (*key, env::var(key).ok())).collect();
            for key in KEYS {
                env::remove_var(key);
            }
            Self { saved }
        }

        fn set(&self, key: &str, value: &str) {
            env::set_var(key, value);
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, previous) in &self.saved {
                match previous {
                    Some(value) => env::set_var(key, value),
                    None => env::remove_var(key),
                }
            }
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_only_required_vars_are_set() {
        let guard = EnvGuard::new();
        guard.set("TELEGRAM_BOT_TOKEN", "123:abc");
        guard.set("CHANNEL_ID", "-1001234");

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.channel_id, -1001234);
        assert_eq!(config.port, 8000);
        assert!(config.telegram_polling);
        assert_eq!(config.trial_scan_time, NaiveTime::from_hms_opt(9, 5, 0).unwrap());
        assert_eq!(config.content_schedule, ContentSchedule::Disabled);
        assert_eq!(config.lifecycle.trial_length, ChronoDuration::days(7));
        assert_eq!(config.lifecycle.keywords.len(), 6);
        assert!(config.lifecycle.admin_user_id.is_none());
        assert!(config.subscribers_db_path.ends_with("state/subscribers.db"));
    }

    #[test]
    #[serial]
    fn missing_token_is_reported() {
        let guard = EnvGuard::new();
        guard.set("CHANNEL_ID", "-1001234");
        assert!(matches!(
            ServiceConfig::from_env(),
            Err(ConfigError::Missing("TELEGRAM_BOT_TOKEN"))
        ));
    }

    #[test]
    #[serial]
    fn overrides_and_content_times_are_parsed() {
        let guard = EnvGuard::new();
        guard.set("TELEGRAM_BOT_TOKEN", "123:abc");
        guard.set("CHANNEL_ID", "-1001234");
        guard.set("ADMIN_USER_ID", "42");
        guard.set("TRIAL_PERIOD_DAYS", "3");
        guard.set("CONFIRMATION_KEYWORDS", "agree, ok ,");
        guard.set("CONTENT_POSTING_TIMES", "10:00, 18:30");
        guard.set("TELEGRAM_POLLING", "false");

        let config = ServiceConfig::from_env().unwrap();

        assert_eq!(config.lifecycle.admin_user_id, Some(42));
        assert_eq!(config.lifecycle.trial_length, ChronoDuration::days(3));
        assert_eq!(config.lifecycle.keywords, vec!["agree", "ok"]);
        assert!(!config.telegram_polling);
        assert_eq!(
            config.content_schedule,
            ContentSchedule::Times(vec![
                NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
            ])
        );
    }

    #[test]
    #[serial]
    fn interval_window_and_bad_values() {
        let guard = EnvGuard::new();
        guard.set("TELEGRAM_BOT_TOKEN", "123:abc");
        guard.set("CHANNEL_ID", "-1001234");
        guard.set("CONTENT_POST_INTERVAL_MINUTES", "45");
        guard.set("CONTENT_POST_WINDOW", "10:00-22:00");

        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(
            config.content_schedule,
            ContentSchedule::Interval {
                every_minutes: 45,
                window_start: NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
                window_end: NaiveTime::from_hms_opt(22, 0, 0).unwrap(),
            }
        );

        guard.set("TRIAL_SCAN_TIME", "9am");
        assert!(matches!(
            ServiceConfig::from_env(),
            Err(ConfigError::Invalid {
                key: "TRIAL_SCAN_TIME",
                ..
            })
        ));
    }

    #[test]
    #[serial]
    fn out_of_range_durations_are_rejected() {
        let guard = EnvGuard::new();
        guard.set("TELEGRAM_BOT_TOKEN", "123:abc");
        guard.set("CHANNEL_ID", "-1001234");

        guard.set("TRIAL_PERIOD_DAYS", "1000000000000");
        assert!(matches!(
            ServiceConfig::from_env(),
            Err(ConfigError::Invalid {
                key: "TRIAL_PERIOD_DAYS",
                ..
            })
        ));

        guard.set("TRIAL_PERIOD_DAYS", "7");
        guard.set("DISCLAIMER_WARNING_HOURS", "-5");
        assert!(matches!(
            ServiceConfig::from_env(),
            Err(ConfigError::Invalid {
                key: "DISCLAIMER_WARNING_HOURS",
                ..
            })
        ));

        guard.set("DISCLAIMER_WARNING_HOURS", "12");
        guard.set("TRIAL_REMINDER_WINDOW_HOURS", "100000");
        assert!(matches!(
            ServiceConfig::from_env(),
            Err(ConfigError::Invalid {
                key: "TRIAL_REMINDER_WINDOW_HOURS",
                ..
            })
        ));

        guard.set("TRIAL_REMINDER_WINDOW_HOURS", "48");
        let config = ServiceConfig::from_env().unwrap();
        assert_eq!(config.lifecycle.warning_delay, ChronoDuration::hours(12));
        assert_eq!(config.lifecycle.reminder_window, ChronoDuration::hours(48));
    }
}
