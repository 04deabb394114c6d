use chrono::{DateTime, Utc};

use super::LifecycleConfig;
use crate::subscriber::SubscriberId;

fn format_day(value: DateTime<Utc>) -> String {
    value.format("%d/%m/%Y").to_string()
}

fn payment_line(config: &LifecycleConfig) -> String {
    match &config.payment_link {
        Some(link) => format!("To keep your access, subscribe here: {}", link),
        None => "To keep your access, reply here and we will send you the payment details."
            .to_string(),
    }
}

pub(crate) fn disclaimer(config: &LifecycleConfig, display_name: &str) -> String {
    let example_keyword = config
        .keywords
        .iter()
        .find(|keyword| keyword.is_ascii())
        .or_else(|| config.keywords.first())
        .map(String::as_str)
        .unwrap_or("ok");
    format!(
        "Hi {name}!\n\n\
         Before you join {channel} for a free {days}-day trial, please read this disclaimer:\n\
         The content shared in the channel is for information and education only. It is not \
         investment advice, and every decision you make is your own responsibility.\n\n\
         To accept, reply with your email address and a confirmation word in one message, \
         for example:\n\
         name@example.com {keyword}",
        name = display_name,
        channel = config.channel_name,
        days = config.trial_length.num_days(),
        keyword = example_keyword,
    )
}

pub(crate) fn already_active(config: &LifecycleConfig) -> String {
    format!(
        "You are already registered and your access to {} is active.",
        config.channel_name
    )
}

pub(crate) fn payment_required(config: &LifecycleConfig) -> String {
    format!(
        "Your free trial of {} has already been used.\n{}",
        config.channel_name,
        payment_line(config)
    )
}

pub(crate) fn cancelled_notice() -> String {
    "You cancelled your registration earlier. Contact us if you would like to come back."
        .to_string()
}

pub(crate) fn cancel_ack() -> String {
    "Your registration has been cancelled. Nothing further will be sent.".to_string()
}

pub(crate) fn cancel_refused() -> String {
    "Your trial is already running, so it cannot be cancelled here. Contact us for help."
        .to_string()
}

pub(crate) fn invalid_confirmation(config: &LifecycleConfig) -> String {
    format!(
        "I could not read that. Please send your email address together with one of these \
         words in the same message: {}",
        config.keywords.join(", ")
    )
}

pub(crate) fn start_first() -> String {
    "Send /start to begin.".to_string()
}

pub(crate) fn help(config: &LifecycleConfig) -> String {
    format!(
        "/start - register for a free {days}-day trial of {channel}\n\
         /cancel - cancel a registration that was not confirmed yet\n\
         /help - show this message\n\n\
         To confirm the disclaimer, send your email address and a confirmation word together.",
        days = config.trial_length.num_days(),
        channel = config.channel_name,
    )
}

pub(crate) fn disclaimer_warning(config: &LifecycleConfig) -> String {
    format!(
        "We have not received your confirmation yet. Your free trial of {} starts as soon as \
         you reply with your email address and a confirmation word.",
        config.channel_name
    )
}

pub(crate) fn welcome(
    config: &LifecycleConfig,
    link: &str,
    trial_end: DateTime<Utc>,
    link_expires_at: DateTime<Utc>,
) -> String {
    format!(
        "Confirmed, welcome aboard!\n\n\
         Your trial of {channel} runs until {end}.\n\
         Join with this personal link (single use, valid until {expires}):\n{link}",
        channel = config.channel_name,
        end = format_day(trial_end),
        expires = format_day(link_expires_at),
        link = link,
    )
}

pub(crate) fn access_grant_failed() -> String {
    "Your confirmation was saved, but we could not create your invite link. \
     Our team has been notified and will send it to you shortly."
        .to_string()
}

pub(crate) fn operator_access_failed(
    subscriber_id: SubscriberId,
    display_name: &str,
    error: &str,
) -> String {
    format!(
        "Failed to create an invite link for {} ({}): {}",
        display_name, subscriber_id, error
    )
}

pub(crate) fn trial_reminder(config: &LifecycleConfig, trial_end: DateTime<Utc>) -> String {
    format!(
        "Reminder: your free trial of {} ends on {}.\n{}",
        config.channel_name,
        format_day(trial_end),
        payment_line(config)
    )
}

pub(crate) fn trial_expired(config: &LifecycleConfig) -> String {
    format!(
        "Your free trial of {} has ended and your access was removed.\n{}",
        config.channel_name,
        payment_line(config)
    )
}

pub(crate) fn operator_revoke_failed(
    subscriber_id: SubscriberId,
    display_name: &str,
    error: &str,
) -> String {
    format!(
        "Trial of {} ({}) expired but removing them from the channel failed: {}",
        display_name, subscriber_id, error
    )
}

pub(crate) fn payment_thanks(config: &LifecycleConfig) -> String {
    format!(
        "Thank you for subscribing! Your access to {} continues.",
        config.channel_name
    )
}

pub(crate) fn payment_thanks_with_link(config: &LifecycleConfig, link: &str) -> String {
    format!(
        "Thank you for subscribing! Rejoin {} with this personal link:\n{}",
        config.channel_name, link
    )
}
