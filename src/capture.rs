//! Capture pipeline
//!
//! One instance per watched page: select extractor by URL, extract, drop turns
//! already captured, and hand the rest to the background sink. All state lives
//! on the instance so several pages (or tests) can run side by side.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::dedup::CaptureState;
use crate::extractors::extract_conversations;
use crate::messaging::{Message, Transport};
use crate::models::ConversationRecord;
use crate::page::PageSource;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Container or turns not on the page yet
    NotReady,
    /// Everything extracted was already captured
    NoChanges,
    /// New turns found but auto-save is switched off
    Disabled { fresh: usize },
    /// New turns handed to the sink; `delivered` is false when the send failed
    Dispatched { count: usize, delivered: bool },
    /// The page itself could not be read
    Unavailable,
}

pub struct CapturePipeline {
    session_id: Uuid,
    source: Box<dyn PageSource>,
    transport: Arc<dyn Transport>,
    state: Mutex<CaptureState>,
    auto_save: AtomicBool,
}

impl CapturePipeline {
    pub fn new(source: Box<dyn PageSource>, transport: Arc<dyn Transport>, capture_window: usize) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            source,
            transport,
            state: Mutex::new(CaptureState::with_window(capture_window)),
            auto_save: AtomicBool::new(true),
        }
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn set_auto_save(&self, enabled: bool) {
        self.auto_save.store(enabled, Ordering::SeqCst);
    }

    pub fn auto_save_enabled(&self) -> bool {
        self.auto_save.load(Ordering::SeqCst)
    }

    /// Number of turns currently remembered for deduplication
    pub fn remembered(&self) -> usize {
        self.state.lock().map(|state| state.len()).unwrap_or(0)
    }

    /// Read the page and return the turns not captured before.
    /// `Ok(None)` means the page is not ready.
    pub fn extract_new(&self) -> Result<Option<Vec<ConversationRecord>>> {
        let page = self.source.snapshot()?;
        let Some(records) = extract_conversations(&page.html, &page.url) else {
            return Ok(None);
        };

        let mut state = self
            .state
            .lock()
            .map_err(|_| anyhow::anyhow!("capture state lock poisoned"))?;
        Ok(Some(state.filter_new(records)))
    }

    /// One full capture pass. Never fails: every problem degrades to
    /// "no capture this cycle".
    pub async fn capture_once(&self) -> CaptureOutcome {
        let fresh = match self.extract_new() {
            Ok(Some(fresh)) => fresh,
            Ok(None) => {
                debug!("[{}] Page not ready, waiting for the next change", self.session_id);
                return CaptureOutcome::NotReady;
            }
            Err(e) => {
                warn!("⚠️  [{}] Could not read page: {:#}", self.session_id, e);
                return CaptureOutcome::Unavailable;
            }
        };

        if fresh.is_empty() {
            return CaptureOutcome::NoChanges;
        }
        if !self.auto_save_enabled() {
            debug!("[{}] Auto-save disabled, {} new turns not sent", self.session_id, fresh.len());
            return CaptureOutcome::Disabled { fresh: fresh.len() };
        }

        let count = fresh.len();
        info!("📝 [{}] Captured {} new turns", self.session_id, count);

        let delivered = match self.transport.send(Message::SaveConversation { data: fresh }).await {
            Ok(response) if response.is_success() => {
                debug!("[{}] Sink acknowledged {} turns", self.session_id, count);
                true
            }
            Ok(response) => {
                warn!("⚠️  [{}] Sink rejected the save: {:?}", self.session_id, response);
                false
            }
            Err(e) => {
                warn!("⚠️  [{}] Could not reach the sink, capture lost this cycle: {}", self.session_id, e);
                false
            }
        };

        CaptureOutcome::Dispatched { count, delivered }
    }
}
