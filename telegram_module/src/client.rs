use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::multipart::{Form, Part};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::error::TelegramError;
use crate::types::{
    ApiResponse, ChatInviteLink, ChatMemberRequest, CreateInviteLinkRequest, GetUpdatesRequest,
    Message, SendMessageRequest, Update, User,
};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Asynchronous client for the Telegram Bot API.
#[derive(Debug, Clone)]
pub struct TelegramClient {
    bot_token: String,
    api_base: String,
    http: reqwest::Client,
}

impl TelegramClient {
    pub fn new(bot_token: impl Into<String>) -> Self {
        Self::with_api_base(bot_token, DEFAULT_API_BASE)
    }

    /// Point the client at a different API host (used by tests and local Bot API servers).
    pub fn with_api_base(bot_token: impl Into<String>, api_base: impl Into<String>) -> Self {
        Self {
            bot_token: bot_token.into(),
            api_base: api_base.into().trim_end_matches('/').to_string(),
            http: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    pub async fn get_me(&self) -> Result<User, TelegramError> {
        self.call("getMe", &serde_json::json!({})).await
    }

    /// Long-poll for updates after `offset`. The HTTP timeout is padded past the poll timeout.
    pub async fn get_updates(
        &self,
        offset: Option<i64>,
        timeout: Duration,
    ) -> Result<Vec<Update>, TelegramError> {
        let request = GetUpdatesRequest {
            offset,
            timeout: timeout.as_secs(),
            allowed_updates: vec!["message".to_string(), "edited_message".to_string()],
        };
        let response = self
            .http
            .post(self.api_url("getUpdates"))
            .timeout(timeout + Duration::from_secs(10))
            .json(&request)
            .send()
            .await?;
        decode("getUpdates", response).await
    }

    pub async fn send_message(&self, chat_id: i64, text: &str) -> Result<Message, TelegramError> {
        let request = SendMessageRequest {
            chat_id,
            text: text.to_string(),
            parse_mode: None,
            disable_web_page_preview: Some(true),
        };
        self.call("sendMessage", &request).await
    }

    pub async fn send_photo(
        &self,
        chat_id: i64,
        photo: Vec<u8>,
        caption: &str,
    ) -> Result<Message, TelegramError> {
        let part = Part::bytes(photo)
            .file_name("chart.png")
            .mime_str("image/png")?;
        let form = Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .part("photo", part);
        let response = self
            .http
            .post(self.api_url("sendPhoto"))
            .multipart(form)
            .send()
            .await?;
        decode("sendPhoto", response).await
    }

    /// Create an invite link limited to a single member that stops working at `expires_at`.
    pub async fn create_chat_invite_link(
        &self,
        chat_id: i64,
        name: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<ChatInviteLink, TelegramError> {
        // Telegram caps invite link names at 32 characters.
        let name: String = name.chars().take(32).collect();
        let request = CreateInviteLinkRequest {
            chat_id,
            name: Some(name),
            expire_date: Some(expires_at.timestamp()),
            member_limit: Some(1),
        };
        self.call("createChatInviteLink", &request).await
    }

    pub async fn ban_chat_member(&self, chat_id: i64, user_id: i64) -> Result<(), TelegramError> {
        let request = ChatMemberRequest {
            chat_id,
            user_id,
            only_if_banned: None,
        };
        let _: bool = self.call("banChatMember", &request).await?;
        Ok(())
    }

    pub async fn unban_chat_member(
        &self,
        chat_id: i64,
        user_id: i64,
    ) -> Result<(), TelegramError> {
        let request = ChatMemberRequest {
            chat_id,
            user_id,
            only_if_banned: Some(true),
        };
        let _: bool = self.call("unbanChatMember", &request).await?;
        Ok(())
    }

    async fn call<B, T>(&self, method: &'static str, body: &B) -> Result<T, TelegramError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("telegram call {}", method);
        let response = self.http.post(self.api_url(method)).json(body).send().await?;
        decode(method, response).await
    }
}

async fn decode<T: DeserializeOwned>(
    method: &'static str,
    response: reqwest::Response,
) -> Result<T, TelegramError> {
    let status = response.status();
    let body = response.text().await?;
    let parsed: ApiResponse<T> = serde_json::from_str(&body).map_err(|err| {
        if status.is_success() {
            TelegramError::Decode(err)
        } else {
            TelegramError::Status {
                method,
                status: status.as_u16(),
                body: body.clone(),
            }
        }
    })?;
    if !parsed.ok {
        return Err(TelegramError::Api {
            method,
            code: parsed.error_code,
            description: parsed
                .description
                .unwrap_or_else(|| "Unknown error".to_string()),
        });
    }
    parsed.result.ok_or(TelegramError::MissingResult(method))
}
