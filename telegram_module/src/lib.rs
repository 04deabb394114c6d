//! Minimal asynchronous Telegram Bot API client.
//!
//! Covers what the subscription bot needs: polling for updates, sending messages and photos,
//! and managing channel membership through invite links and bans.

mod client;
mod error;
mod types;

pub use client::{TelegramClient, DEFAULT_API_BASE};
pub use error::TelegramError;
pub use types::{
    ApiResponse, Chat, ChatInviteLink, ChatMemberRequest, CreateInviteLinkRequest,
    GetUpdatesRequest, Message, SendMessageRequest, Update, User,
};

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use mockito::Matcher;
    use std::time::Duration;

    const TOKEN: &str = "123:abc";

    #[tokio::test]
    async fn send_message_posts_chat_and_text() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/bot123:abc/sendMessage")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "chat_id": 42,
                "text": "hello"
            })))
            .with_status(200)
            .with_body(
                r#"{"ok":true,"result":{"message_id":7,"chat":{"id":42,"type":"private"},"date":1700000000,"text":"hello"}}"#,
            )
            .create_async()
            .await;

        let client = TelegramClient::with_api_base(TOKEN, server.url());
        let message = client.send_message(42, "hello").await.unwrap();

        mock.assert_async().await;
        assert_eq!(message.message_id, 7);
        assert_eq!(message.chat.id, 42);
    }

    #[tokio::test]
    async fn api_error_surfaces_description() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot123:abc/banChatMember")
            .with_status(400)
            .with_body(
                r#"{"ok":false,"error_code":400,"description":"Bad Request: not enough rights"}"#,
            )
            .create_async()
            .await;

        let client = TelegramClient::with_api_base(TOKEN, server.url());
        let err = client.ban_chat_member(-100, 42).await.unwrap_err();
        match err {
            TelegramError::Api {
                method,
                code,
                description,
            } => {
                assert_eq!(method, "banChatMember");
                assert_eq!(code, Some(400));
                assert!(description.contains("not enough rights"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn invite_link_is_single_use_and_expiring() {
        let mut server = mockito::Server::new_async().await;
        let expires_at = Utc.with_ymd_and_hms(2030, 1, 9, 12, 0, 0).unwrap();
        let mock = server
            .mock("POST", "/bot123:abc/createChatInviteLink")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "chat_id": -100,
                "member_limit": 1,
                "expire_date": expires_at.timestamp()
            })))
            .with_status(200)
            .with_body(r#"{"ok":true,"result":{"invite_link":"https://t.me/+abc","member_limit":1}}"#)
            .create_async()
            .await;

        let client = TelegramClient::with_api_base(TOKEN, server.url());
        let link = client
            .create_chat_invite_link(-100, "Trial for a-rather-long-display-name-value", expires_at)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(link.invite_link, "https://t.me/+abc");
    }

    #[tokio::test]
    async fn get_updates_decodes_messages() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/bot123:abc/getUpdates")
            .with_status(200)
            .with_body(
                r#"{"ok":true,"result":[{"update_id":10,"message":{"message_id":1,"from":{"id":5,"is_bot":false,"first_name":"Dana"},"chat":{"id":5,"type":"private"},"date":1700000000,"text":"/start"}}]}"#,
            )
            .create_async()
            .await;

        let client = TelegramClient::with_api_base(TOKEN, server.url());
        let updates = client
            .get_updates(Some(10), Duration::from_secs(0))
            .await
            .unwrap();

        assert_eq!(updates.len(), 1);
        let message = updates[0].clone().into_message().unwrap();
        assert!(message.is_private());
        assert_eq!(message.text.as_deref(), Some("/start"));
        assert_eq!(message.from.unwrap().display_name(), "Dana");
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let user = User {
            id: 99,
            is_bot: false,
            first_name: None,
            last_name: None,
            username: None,
        };
        assert_eq!(user.display_name(), "User_99");
    }
}
