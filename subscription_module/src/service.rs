mod bot;
mod config;
mod server;

use chrono::{DateTime, Timelike, Utc};
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use telegram_module::TelegramClient;
use tracing::{info, warn};

use crate::content::DirectoryContentSource;
use crate::context::AppContext;
use crate::jobs::{JobError, JobKind, JobPayload, RecurringSpec};
use crate::notify::TelegramNotifier;
use crate::subscriber::SqliteSubscriberStore;
use crate::BoxError;

pub use config::{ConfigError, ContentSchedule, ServiceConfig};

/// (Re)install the daily trial scan and, when content is configured, the posting schedule.
/// Registration is keyed by name, so calling this again replaces the previous jobs.
pub fn install_recurring_jobs(
    config: &ServiceConfig,
    ctx: &AppContext,
    now: DateTime<Utc>,
) -> Result<(), JobError> {
    ctx.jobs.schedule_recurring(
        JobKind::RecurringScan.as_str(),
        RecurringSpec::daily(config.trial_scan_time.hour(), config.trial_scan_time.minute()),
        JobPayload::RecurringScan,
        now,
    )?;

    if ctx.content.is_none() {
        return Ok(());
    }
    match &config.content_schedule {
        ContentSchedule::Disabled => {}
        ContentSchedule::Times(times) => {
            for time in times {
                ctx.jobs.schedule_recurring(
                    format!(
                        "{}_{}_{}",
                        JobKind::RecurringContentPost,
                        time.hour(),
                        time.minute()
                    ),
                    RecurringSpec::daily(time.hour(), time.minute()),
                    JobPayload::RecurringContentPost,
                    now,
                )?;
            }
        }
        ContentSchedule::Interval {
            every_minutes,
            window_start,
            window_end,
        } => {
            ctx.jobs.schedule_recurring(
                JobKind::RecurringContentPost.as_str(),
                RecurringSpec::Interval {
                    every_minutes: *every_minutes,
                    window_start: *window_start,
                    window_end: *window_end,
                },
                JobPayload::RecurringContentPost,
                now,
            )?;
        }
    }
    Ok(())
}

pub async fn run_service(
    config: ServiceConfig,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let store = Arc::new(SqliteSubscriberStore::new(&config.subscribers_db_path)?);
    let client = TelegramClient::new(config.telegram_bot_token.clone());
    match client.get_me().await {
        Ok(me) => info!(
            "connected to telegram as @{}",
            me.username.as_deref().unwrap_or("unknown")
        ),
        Err(err) => warn!("telegram getMe failed: {}", err),
    }
    let notifier = Arc::new(TelegramNotifier::new(client.clone(), config.channel_id));

    let mut ctx = AppContext::new(config.lifecycle.clone(), store, notifier);
    if let Some(dir) = &config.content_dir {
        info!("posting content from {}", dir.display());
        ctx = ctx.with_content(Arc::new(DirectoryContentSource::new(dir)));
    }
    let ctx = Arc::new(ctx);

    install_recurring_jobs(&config, &ctx, Utc::now())?;
    let mut runner = ctx.jobs.start(ctx.clone(), config.job_poll_interval);
    let polling = config
        .telegram_polling
        .then(|| tokio::spawn(bot::run_polling(ctx.clone(), client.clone())));

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    let app = server::build_router(server::AppState {
        ctx: ctx.clone(),
        product_permalink: config.gumroad_product_permalink.clone(),
    });

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("subscription bot listening on {}", addr);
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    if let Some(handle) = polling {
        handle.abort();
    }
    runner.stop_and_join().await;
    serve_result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::harness;
    use chrono::NaiveTime;
    use std::path::PathBuf;
    use std::time::Duration;

    fn config(content_schedule: ContentSchedule) -> ServiceConfig {
        ServiceConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            telegram_bot_token: "123:abc".to_string(),
            channel_id: -100,
            telegram_polling: false,
            subscribers_db_path: PathBuf::from("unused.db"),
            gumroad_product_permalink: None,
            trial_scan_time: NaiveTime::from_hms_opt(9, 5, 0).unwrap(),
            content_dir: None,
            content_schedule,
            job_poll_interval: Duration::from_millis(10),
            lifecycle: Default::default(),
        }
    }

    #[test]
    fn scan_is_installed_once_and_content_needs_a_source() {
        let h = harness();
        let schedule = ContentSchedule::Times(vec![
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(18, 30, 0).unwrap(),
        ]);
        let config = config(schedule);

        install_recurring_jobs(&config, &h.ctx, Utc::now()).unwrap();
        install_recurring_jobs(&config, &h.ctx, Utc::now()).unwrap();
        assert_eq!(h.ctx.jobs.pending_names(), vec!["trial_scan".to_string()]);

        let with_content = Arc::try_unwrap(h.ctx)
            .ok()
            .unwrap()
            .with_content(Arc::new(DirectoryContentSource::new(".")));
        install_recurring_jobs(&config, &with_content, Utc::now()).unwrap();
        assert_eq!(
            with_content.jobs.pending_names(),
            vec!["content_post_10_0", "content_post_18_30", "trial_scan"]
        );
    }
}
