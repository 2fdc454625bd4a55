//! Delivery to subscribers.
//!
//! The orchestrator only needs "hand this rendered message to that
//! subscriber"; [`TelegramNotifier`] implements it over the Telegram Bot
//! HTTP API, where a subscriber id is a chat id.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::DeliveryError;
use crate::source::Notification;
use crate::subscription::SubscriberId;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn deliver(&self, subscriber: SubscriberId, content: &Notification) -> Result<(), DeliveryError>;
}

#[derive(Deserialize)]
struct ApiResponse {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
}

/// Sends photos (with an HTML caption) or plain HTML messages to chats.
#[derive(Clone)]
pub struct TelegramNotifier {
    client: reqwest::Client,
    api_url: String,
    token: String,
}

impl TelegramNotifier {
    pub fn new(api_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_url: api_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_url, self.token, method)
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn deliver(&self, subscriber: SubscriberId, content: &Notification) -> Result<(), DeliveryError> {
        let (method, body) = match &content.image_url {
            Some(photo) => (
                "sendPhoto",
                json!({
                    "chat_id": subscriber,
                    "photo": photo,
                    "caption": content.text,
                    "parse_mode": "HTML",
                }),
            ),
            None => (
                "sendMessage",
                json!({
                    "chat_id": subscriber,
                    "text": content.text,
                    "parse_mode": "HTML",
                }),
            ),
        };

        // Telegram reports most failures as a JSON body with ok=false, so the
        // status alone is not enough.
        let response = self.client.post(self.method_url(method)).json(&body).send().await?;
        let status = response.status();
        let parsed: Result<ApiResponse, _> = response.json().await;
        match parsed {
            Ok(api) if api.ok && status.is_success() => Ok(()),
            Ok(api) => Err(DeliveryError::Rejected(
                api.description.unwrap_or_else(|| format!("status {status}")),
            )),
            Err(_) => Err(DeliveryError::Rejected(format!("status {status}"))),
        }
    }
}
