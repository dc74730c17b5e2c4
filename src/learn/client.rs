use anyhow::anyhow;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::{AppError, AppResult};

/// Client for the remote assistant API. The `response` text it returns is
/// opaque here; see [`crate::learn::parse`] for the structured readings.
#[derive(Debug, Clone)]
pub struct AssistantClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct NewChatResponse {
    success: bool,
    #[serde(rename = "chatId", default)]
    chat_id: String,
}

#[derive(Serialize)]
struct MessageRequest<'a> {
    #[serde(rename = "chatId")]
    chat_id: &'a str,
    message: &'a str,
}

#[derive(Deserialize)]
struct MessageResponse {
    success: bool,
    #[serde(default)]
    response: String,
}

impl AssistantClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.assistant_url.clone())
    }

    pub async fn new_chat(&self) -> AppResult<String> {
        let res: NewChatResponse = self
            .http
            .post(format!("{}/chat/new", self.base_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !res.success {
            return Err(AppError::Backend(anyhow!("assistant refused to open a chat")));
        }
        Ok(res.chat_id)
    }

    /// One request, one reply; no retries. Callers parse the returned text
    /// and fall back to showing it verbatim when parsing fails.
    pub async fn send_message(&self, chat_id: &str, message: &str) -> AppResult<String> {
        let res: MessageResponse = self
            .http
            .post(format!("{}/chat/message", self.base_url))
            .json(&MessageRequest { chat_id, message })
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !res.success {
            return Err(AppError::Backend(anyhow!("assistant rejected the message")));
        }
        Ok(res.response)
    }
}
