//! Messages exchanged between the capture pipeline and the background sink
//!
//! Wire shapes follow the extension message protocol: requests carry an
//! `action` tag, replies are plain objects.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::models::{ConversationRecord, SaveStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Message {
    SaveConversation { data: Vec<ConversationRecord> },
    SaveConversations { conversations: Vec<ConversationRecord> },
    GetSaveStatus,
    GetConversationHistory,
}

impl Message {
    pub fn action(&self) -> &'static str {
        match self {
            Message::SaveConversation { .. } => "saveConversation",
            Message::SaveConversations { .. } => "saveConversations",
            Message::GetSaveStatus => "getSaveStatus",
            Message::GetConversationHistory => "getConversationHistory",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AckResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: SaveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub history: Vec<ConversationRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Ack(AckResponse),
    Status(StatusResponse),
    History(HistoryResponse),
}

impl Response {
    pub fn ok() -> Self {
        Response::Ack(AckResponse {
            success: true,
            error: None,
        })
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Response::Ack(AckResponse {
            success: false,
            error: Some(error.into()),
        })
    }

    /// Whether an acknowledgement reported success; non-ack replies count as success
    pub fn is_success(&self) -> bool {
        match self {
            Response::Ack(ack) => ack.success,
            _ => true,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    #[error("Could not establish connection. Receiving end does not exist.")]
    ReceiverMissing,
    #[error("The message port closed before a response was received.")]
    ReplyDropped,
}

/// Request/response channel to the background sink
pub trait Transport: Send + Sync {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<Response, TransportError>>;
}

pub(crate) struct Envelope {
    pub message: Message,
    pub reply: oneshot::Sender<Response>,
}

/// In-process transport backed by the background actor's mailbox
#[derive(Clone)]
pub struct ChannelTransport {
    sender: mpsc::Sender<Envelope>,
}

impl ChannelTransport {
    pub(crate) fn new(sender: mpsc::Sender<Envelope>) -> Self {
        Self { sender }
    }
}

impl Transport for ChannelTransport {
    fn send(&self, message: Message) -> BoxFuture<'_, Result<Response, TransportError>> {
        Box::pin(async move {
            let (reply, response) = oneshot::channel();
            self.sender
                .send(Envelope { message, reply })
                .await
                .map_err(|_| TransportError::ReceiverMissing)?;
            response.await.map_err(|_| TransportError::ReplyDropped)
        })
    }
}
