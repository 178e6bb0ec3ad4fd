//! Background persistence sink
//!
//! Owns local storage and the remote API client. Requests are handled one at
//! a time from a mailbox, so storage reads and writes never interleave.
//! Local persistence always happens first; the remote copy is best effort and
//! only moves `saveStatus` between idle → saving → saved | error.

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::api::{ApiError, AutoSavePayload, PromptApi};
use crate::messaging::{ChannelTransport, Envelope, HistoryResponse, Message, Response, StatusResponse};
use crate::models::{ConversationRecord, SaveStatus, StatusUpdate};
use crate::storage::{
    LocalStore, KEY_AUTH_TOKEN, KEY_CONVERSATION_HISTORY, KEY_LAST_SAVED, KEY_SAVE_STATUS,
};

/// Default cap on locally persisted history
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

const MAILBOX_SIZE: usize = 64;
const STATUS_CHANNEL_SIZE: usize = 32;

pub struct BackgroundService {
    store: LocalStore,
    api: Option<Box<dyn PromptApi>>,
    history_limit: usize,
    status_tx: broadcast::Sender<StatusUpdate>,
}

impl BackgroundService {
    pub fn new(store: LocalStore, api: Option<Box<dyn PromptApi>>, history_limit: usize) -> Self {
        let (status_tx, _) = broadcast::channel(STATUS_CHANNEL_SIZE);
        Self {
            store,
            api,
            history_limit,
            status_tx,
        }
    }

    /// Listen for `updateSaveStatus` broadcasts
    pub fn subscribe(&self) -> broadcast::Receiver<StatusUpdate> {
        self.status_tx.subscribe()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    /// Move the service onto its own task and hand back a transport to it
    pub fn spawn(self) -> (ChannelTransport, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(MAILBOX_SIZE);
        let handle = tokio::spawn(self.run(receiver));
        (ChannelTransport::new(sender), handle)
    }

    async fn run(mut self, mut receiver: mpsc::Receiver<Envelope>) {
        info!("📮 Background sink ready");
        while let Some(envelope) = receiver.recv().await {
            let response = self.handle(envelope.message).await;
            if envelope.reply.send(response).is_err() {
                debug!("Sender went away before the reply was delivered");
            }
        }
        info!("📪 Background sink stopped");
    }

    pub async fn handle(&mut self, message: Message) -> Response {
        debug!("📨 Received {}", message.action());
        match message {
            Message::SaveConversation { data } => self.save_conversations(data).await,
            Message::SaveConversations { conversations } => self.save_conversations(conversations).await,
            Message::GetSaveStatus => match self.save_status() {
                Ok((status, timestamp)) => Response::Status(StatusResponse { status, timestamp }),
                Err(e) => Response::failed(e.to_string()),
            },
            Message::GetConversationHistory => match self.history() {
                Ok(history) => Response::History(HistoryResponse { history }),
                Err(e) => Response::failed(e.to_string()),
            },
        }
    }

    async fn save_conversations(&mut self, records: Vec<ConversationRecord>) -> Response {
        if records.is_empty() {
            debug!("Nothing to save");
            return Response::ok();
        }

        if let Err(e) = self.save_conversations_to_local(&records) {
            error!("❌ Failed to save conversations locally: {:#}", e);
            return Response::failed(format!("{:#}", e));
        }

        // Remote failure only shows up in saveStatus; the local copy stands
        self.save_conversations_to_api(&records).await;
        Response::ok()
    }

    /// Prepend to the bounded history, most recent first
    pub fn save_conversations_to_local(&self, records: &[ConversationRecord]) -> Result<()> {
        let history = self.history()?;
        let mut incoming: Vec<ConversationRecord> = records.iter().rev().cloned().collect();
        incoming.extend(history);
        incoming.truncate(self.history_limit);

        self.store.set(KEY_CONVERSATION_HISTORY, &incoming)?;
        info!(
            "💾 Saved {} conversations locally ({} in history)",
            records.len(),
            incoming.len()
        );
        Ok(())
    }

    /// Forward to the remote API. Returns `false` without any request when no
    /// auth token is stored or no API is configured.
    pub async fn save_conversations_to_api(&mut self, records: &[ConversationRecord]) -> bool {
        let token = match self.store.auth_token() {
            Ok(Some(token)) => token,
            Ok(None) => {
                debug!("No auth token stored, skipping remote save");
                return false;
            }
            Err(e) => {
                warn!("⚠️  Could not read auth token: {:#}", e);
                return false;
            }
        };
        let Some(api) = self.api.as_ref() else {
            debug!("No prompt API configured, skipping remote save");
            return false;
        };

        self.set_status(SaveStatus::Saving, None, None);

        let mut failure = None;
        for record in records {
            let payload = AutoSavePayload::from(record);
            if let Err(e) = api.auto_save(&token, &payload).await {
                failure = Some(e);
                break;
            }
        }

        match failure {
            None => {
                let now = Utc::now();
                if let Err(e) = self.store.set(KEY_LAST_SAVED, &now) {
                    warn!("⚠️  Could not record lastSaved: {:#}", e);
                }
                self.set_status(SaveStatus::Saved, Some(now), None);
                info!("☁️  Forwarded {} conversations to the prompt API", records.len());
                true
            }
            Some(e) => {
                warn!("⚠️  Remote save failed, kept local copy only: {}", e);
                if matches!(e, ApiError::Unauthorized) {
                    warn!("🔑 Auth token rejected, clearing it");
                    if let Err(err) = self.store.remove(KEY_AUTH_TOKEN) {
                        warn!("⚠️  Could not clear auth token: {:#}", err);
                    }
                }
                self.set_status(SaveStatus::Error, None, Some(e.to_string()));
                false
            }
        }
    }

    pub fn history(&self) -> Result<Vec<ConversationRecord>> {
        Ok(self
            .store
            .get::<Vec<ConversationRecord>>(KEY_CONVERSATION_HISTORY)?
            .unwrap_or_default())
    }

    pub fn save_status(&self) -> Result<(SaveStatus, Option<DateTime<Utc>>)> {
        let status = self.store.get::<SaveStatus>(KEY_SAVE_STATUS)?.unwrap_or_default();
        let last_saved = self.store.get::<DateTime<Utc>>(KEY_LAST_SAVED)?;
        Ok((status, last_saved))
    }

    fn set_status(&self, status: SaveStatus, timestamp: Option<DateTime<Utc>>, error: Option<String>) {
        if let Err(e) = self.store.set(KEY_SAVE_STATUS, &status) {
            warn!("⚠️  Could not persist saveStatus: {:#}", e);
        }
        // No listeners is fine
        let _ = self.status_tx.send(StatusUpdate::new(status, timestamp, error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messaging::Transport;
    use crate::models::Platform;
    use futures::future::BoxFuture;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingApi {
        calls: Arc<AtomicUsize>,
        outcome: fn() -> Result<(), ApiError>,
    }

    impl PromptApi for CountingApi {
        fn auto_save<'a>(
            &'a self,
            _token: &'a str,
            _payload: &'a AutoSavePayload,
        ) -> BoxFuture<'a, Result<(), ApiError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = (self.outcome)();
            Box::pin(async move { outcome })
        }
    }

    fn service(outcome: fn() -> Result<(), ApiError>) -> (BackgroundService, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let api = CountingApi {
            calls: calls.clone(),
            outcome,
        };
        let store = LocalStore::open_in_memory().unwrap();
        (
            BackgroundService::new(store, Some(Box::new(api)), DEFAULT_HISTORY_LIMIT),
            calls,
        )
    }

    fn record(prompt: &str) -> ConversationRecord {
        ConversationRecord::new(Platform::ChatGPT, prompt, "answer", "https://chatgpt.com/c/1")
    }

    #[tokio::test]
    async fn test_empty_save_is_noop() {
        let (mut sink, calls) = service(|| Ok(()));
        let response = sink.handle(Message::SaveConversation { data: vec![] }).await;
        assert_eq!(response, Response::ok());
        assert!(sink.history().unwrap().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_token_skips_remote() {
        let (mut sink, calls) = service(|| Ok(()));
        let response = sink
            .handle(Message::SaveConversations {
                conversations: vec![record("q")],
            })
            .await;
        assert!(response.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(!sink.save_conversations_to_api(&[record("q")]).await);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(sink.history().unwrap().len(), 1);
        assert_eq!(sink.save_status().unwrap(), (SaveStatus::Idle, None));
    }

    #[tokio::test]
    async fn test_history_is_most_recent_first_and_bounded() {
        let (sink, _) = service(|| Ok(()));
        let first: Vec<_> = (0..60).map(|i| record(&format!("a{}", i))).collect();
        let second: Vec<_> = (0..60).map(|i| record(&format!("b{}", i))).collect();
        sink.save_conversations_to_local(&first).unwrap();
        sink.save_conversations_to_local(&second).unwrap();

        let history = sink.history().unwrap();
        assert_eq!(history.len(), DEFAULT_HISTORY_LIMIT);
        assert_eq!(history[0].prompt, "b59");
        assert_eq!(history[59].prompt, "b0");
        assert_eq!(history[60].prompt, "a59");
        assert_eq!(history[99].prompt, "a20");
    }

    #[tokio::test]
    async fn test_remote_success_updates_status() {
        let (mut sink, calls) = service(|| Ok(()));
        sink.store().set(KEY_AUTH_TOKEN, "secret").unwrap();
        let mut updates = sink.subscribe();

        assert!(sink.save_conversations_to_api(&[record("q1"), record("q2")]).await);
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        assert_eq!(updates.recv().await.unwrap().status, SaveStatus::Saving);
        let saved = updates.recv().await.unwrap();
        assert_eq!(saved.status, SaveStatus::Saved);
        assert!(saved.timestamp.is_some());

        let (status, last_saved) = sink.save_status().unwrap();
        assert_eq!(status, SaveStatus::Saved);
        assert!(last_saved.is_some());
    }

    #[tokio::test]
    async fn test_remote_failure_keeps_local_copy() {
        let (mut sink, _) = service(|| {
            Err(ApiError::Status {
                status: 500,
                body: "down".to_string(),
            })
        });
        sink.store().set(KEY_AUTH_TOKEN, "secret").unwrap();
        let mut updates = sink.subscribe();

        let response = sink
            .handle(Message::SaveConversation {
                data: vec![record("q")],
            })
            .await;
        assert!(response.is_success());
        assert_eq!(sink.history().unwrap().len(), 1);

        assert_eq!(updates.recv().await.unwrap().status, SaveStatus::Saving);
        let failed = updates.recv().await.unwrap();
        assert_eq!(failed.status, SaveStatus::Error);
        assert!(failed.error.unwrap().contains("500"));
        assert_eq!(sink.save_status().unwrap().0, SaveStatus::Error);
        // Token survives non-auth failures
        assert!(sink.store().auth_token().unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unauthorized_clears_token() {
        let (mut sink, _) = service(|| Err(ApiError::Unauthorized));
        sink.store().set(KEY_AUTH_TOKEN, "expired").unwrap();
        assert!(!sink.save_conversations_to_api(&[record("q")]).await);
        assert_eq!(sink.store().auth_token().unwrap(), None);
    }

    #[tokio::test]
    async fn test_spawned_sink_answers_queries() {
        let (sink, _) = service(|| Ok(()));
        let (transport, _handle) = sink.spawn();

        let ack = transport
            .send(Message::SaveConversations {
                conversations: vec![record("one"), record("two")],
            })
            .await
            .unwrap();
        assert!(ack.is_success());

        match transport.send(Message::GetConversationHistory).await.unwrap() {
            Response::History(HistoryResponse { history }) => {
                let prompts: Vec<&str> = history.iter().map(|r| r.prompt.as_str()).collect();
                assert_eq!(prompts, vec!["two", "one"]);
            }
            other => panic!("unexpected response: {:?}", other),
        }

        match transport.send(Message::GetSaveStatus).await.unwrap() {
            Response::Status(status) => assert_eq!(status.status, SaveStatus::Idle),
            other => panic!("unexpected response: {:?}", other),
        }
    }
}
