use chrono::{DateTime, Utc};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use telegram_module::{TelegramClient, Update};
use tracing::{debug, info, warn};

use crate::context::AppContext;
use crate::lifecycle::{self, LifecycleError};

const POLL_TIMEOUT: Duration = Duration::from_secs(25);
const POLL_RETRY_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Start,
    Cancel,
    Help,
}

/// `/start`, `/start@SomeBot payload` and friends. Unknown commands map to help.
fn parse_command(text: &str) -> Option<Command> {
    let word = text.strip_prefix('/')?.split_whitespace().next()?;
    let name = word.split('@').next().unwrap_or(word);
    Some(match name.to_ascii_lowercase().as_str() {
        "start" => Command::Start,
        "cancel" => Command::Cancel,
        _ => Command::Help,
    })
}

/// Route one update into the lifecycle. Group chats, bots and non-text messages are ignored.
pub(crate) async fn dispatch_update(
    ctx: &AppContext,
    update: Update,
    now: DateTime<Utc>,
) -> Result<(), LifecycleError> {
    let update_id = update.update_id;
    let Some(message) = update.into_message() else {
        return Ok(());
    };
    if !message.is_private() {
        debug!("ignoring update {} from non-private chat", update_id);
        return Ok(());
    }
    let Some(from) = message.from.as_ref().filter(|user| !user.is_bot) else {
        return Ok(());
    };
    let Some(text) = message.text.as_deref().map(str::trim).filter(|t| !t.is_empty()) else {
        return Ok(());
    };

    let id = from.id;
    match parse_command(text) {
        Some(Command::Start) => {
            let outcome = lifecycle::begin(ctx, id, &from.display_name(), now).await?;
            info!("/start from {}: {:?}", id, outcome);
        }
        Some(Command::Cancel) => {
            let outcome = lifecycle::cancel(ctx, id, now).await?;
            info!("/cancel from {}: {:?}", id, outcome);
        }
        Some(Command::Help) => lifecycle::help(ctx, id).await?,
        None => {
            let outcome = lifecycle::on_message(ctx, id, text, now).await?;
            debug!("message from {}: {:?}", id, outcome);
        }
    }
    Ok(())
}

/// Dispatch one update, logging instead of returning a failure.
pub(crate) async fn handle_update(ctx: &AppContext, update: Update, now: DateTime<Utc>) {
    let update_id = update.update_id;
    if let Err(err) = dispatch_update(ctx, update, now).await {
        warn!("update {} failed: {}", update_id, err);
    }
}

fn sender_id(update: &Update) -> Option<i64> {
    update
        .message
        .as_ref()
        .or(update.edited_message.as_ref())
        .and_then(|message| message.from.as_ref())
        .map(|user| user.id)
}

/// Handle one `getUpdates` batch. Senders proceed concurrently; each sender's updates run in
/// arrival order.
pub(crate) async fn dispatch_batch(ctx: &AppContext, updates: Vec<Update>, now: DateTime<Utc>) {
    let mut per_sender: HashMap<Option<i64>, Vec<Update>> = HashMap::new();
    for update in updates {
        per_sender.entry(sender_id(&update)).or_default().push(update);
    }
    join_all(per_sender.into_values().map(|queue| async move {
        for update in queue {
            handle_update(ctx, update, now).await;
        }
    }))
    .await;
}

/// Long-poll `getUpdates` until the task is aborted. A batch is finished before the next is
/// fetched.
pub(crate) async fn run_polling(ctx: Arc<AppContext>, client: TelegramClient) {
    let mut offset: Option<i64> = None;
    info!("polling telegram for updates");
    loop {
        match client.get_updates(offset, POLL_TIMEOUT).await {
            Ok(updates) => {
                if let Some(last) = updates.last() {
                    offset = Some(last.update_id + 1);
                }
                dispatch_batch(&ctx, updates, Utc::now()).await;
            }
            Err(err) => {
                warn!("getUpdates failed: {}", err);
                tokio::time::sleep(POLL_RETRY_DELAY).await;
            }
        }
    }
}
