//! Remote prompt API client
//!
//! Forwards captured turns to `POST {base}/prompts/auto-save` with a bearer
//! token. Callers treat every failure as non-fatal.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::models::{ConversationRecord, Platform};

const TITLE_CHARS: usize = 50;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unauthorized: token rejected by the prompt API")]
    Unauthorized,
    #[error("prompt API returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Body of an auto-save request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoSavePayload {
    pub title: String,
    pub content: String,
    pub response: String,
    pub platform: Platform,
    pub url: String,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl From<&ConversationRecord> for AutoSavePayload {
    fn from(record: &ConversationRecord) -> Self {
        Self {
            title: record.prompt.chars().take(TITLE_CHARS).collect(),
            content: record.prompt.clone(),
            response: record.response.clone(),
            platform: record.platform,
            url: record.url.clone(),
            timestamp: record.timestamp,
            kind: "auto-save".to_string(),
        }
    }
}

pub trait PromptApi: Send + Sync {
    fn auto_save<'a>(
        &'a self,
        token: &'a str,
        payload: &'a AutoSavePayload,
    ) -> BoxFuture<'a, Result<(), ApiError>>;
}

pub struct HttpPromptApi {
    client: Client,
    base_url: String,
}

impl HttpPromptApi {
    pub fn new(base_url: &str, timeout_secs: u64) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self) -> String {
        format!("{}/prompts/auto-save", self.base_url)
    }
}

impl PromptApi for HttpPromptApi {
    fn auto_save<'a>(
        &'a self,
        token: &'a str,
        payload: &'a AutoSavePayload,
    ) -> BoxFuture<'a, Result<(), ApiError>> {
        Box::pin(async move {
            let url = self.endpoint();
            debug!("📤 POST {}", url);

            let response = self
                .client
                .post(&url)
                .bearer_auth(token)
                .json(payload)
                .send()
                .await?;

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Err(ApiError::Unauthorized);
            }
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(ApiError::Status {
                    status: status.as_u16(),
                    body,
                });
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_from_record() {
        let long_prompt = "é".repeat(80);
        let record = ConversationRecord::new(Platform::Claude, &long_prompt, "ok", "https://claude.ai/chat/9");
        let payload = AutoSavePayload::from(&record);
        assert_eq!(payload.title.chars().count(), 50);
        assert_eq!(payload.content, long_prompt);

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["type"], "auto-save");
        assert_eq!(json["platform"], "Claude");
        assert_eq!(json["url"], "https://claude.ai/chat/9");
    }

    #[test]
    fn test_endpoint_trims_trailing_slash() {
        let api = HttpPromptApi::new("http://localhost:5000/api/", 5).unwrap();
        assert_eq!(api.endpoint(), "http://localhost:5000/api/prompts/auto-save");
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let api = HttpPromptApi::new("http://127.0.0.1:9", 2).unwrap();
        let record = ConversationRecord::new(Platform::ChatGPT, "q", "a", "https://chatgpt.com");
        let err = api
            .auto_save("token", &AutoSavePayload::from(&record))
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
    }
}
