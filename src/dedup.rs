use std::collections::VecDeque;
use tracing::debug;

use crate::models::ConversationRecord;

/// Default number of recently captured records remembered for deduplication
pub const DEFAULT_CAPTURE_WINDOW: usize = 50;

/// Recently captured records, used only to avoid resubmitting unchanged turns
#[derive(Debug, Clone)]
pub struct CaptureState {
    last_captured: VecDeque<ConversationRecord>,
    window: usize,
}

impl CaptureState {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_CAPTURE_WINDOW)
    }

    pub fn with_window(window: usize) -> Self {
        Self {
            last_captured: VecDeque::with_capacity(window),
            window,
        }
    }

    pub fn len(&self) -> usize {
        self.last_captured.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_captured.is_empty()
    }

    pub fn records(&self) -> impl Iterator<Item = &ConversationRecord> {
        self.last_captured.iter()
    }

    /// Keep only the candidates whose (prompt, response) was not captured
    /// before, then remember them, evicting the oldest beyond the window.
    pub fn filter_new(&mut self, candidates: Vec<ConversationRecord>) -> Vec<ConversationRecord> {
        filter_new(candidates, &mut self.last_captured, self.window)
    }
}

impl Default for CaptureState {
    fn default() -> Self {
        Self::new()
    }
}

/// Candidates are compared against `last_captured` as it was on entry, so two
/// identical turns in the same batch are both accepted.
///
/// Only the newest `window` candidates are considered. Every considered
/// candidate, seen or fresh, ends up at the back of the window, so the same
/// extraction run twice yields nothing the second time even when the page
/// holds more turns than the window.
pub fn filter_new(
    candidates: Vec<ConversationRecord>,
    last_captured: &mut VecDeque<ConversationRecord>,
    window: usize,
) -> Vec<ConversationRecord> {
    let total = candidates.len();
    let recent: Vec<ConversationRecord> = candidates
        .into_iter()
        .skip(total.saturating_sub(window))
        .collect();

    let fresh: Vec<ConversationRecord> = recent
        .iter()
        .filter(|candidate| !last_captured.iter().any(|seen| seen.same_turn(candidate)))
        .cloned()
        .collect();

    last_captured.retain(|seen| !recent.iter().any(|candidate| candidate.same_turn(seen)));
    last_captured.extend(recent);
    while last_captured.len() > window {
        last_captured.pop_front();
    }

    debug!("🧮 {} of {} extracted turns are new", fresh.len(), total);
    fresh
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Platform;

    fn record(prompt: &str, response: &str) -> ConversationRecord {
        ConversationRecord::new(Platform::ChatGPT, prompt, response, "https://chatgpt.com/c/1")
    }

    #[test]
    fn test_filter_new_skips_seen_pairs() {
        let mut state = CaptureState::new();
        let first = state.filter_new(vec![record("a", "1"), record("b", "")]);
        assert_eq!(first.len(), 2);

        // The pending response arrived, so ("b", "2") is a different turn
        let second = state.filter_new(vec![record("a", "1"), record("b", "2")]);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].response, "2");
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_filter_new_is_idempotent() {
        let mut state = CaptureState::new();
        let batch = vec![record("x", "y"), record("z", "w")];
        assert_eq!(state.filter_new(batch.clone()).len(), 2);
        assert!(state.filter_new(batch).is_empty());
    }

    #[test]
    fn test_no_normalization() {
        let mut state = CaptureState::new();
        state.filter_new(vec![record("Hello", "World")]);
        assert_eq!(state.filter_new(vec![record("hello", "World")]).len(), 1);
    }

    #[test]
    fn test_window_evicts_oldest() {
        let mut state = CaptureState::with_window(3);
        let batch: Vec<_> = (0..5).map(|i| record(&i.to_string(), "r")).collect();
        let fresh = state.filter_new(batch);
        assert_eq!(fresh.len(), 3);
        assert_eq!(state.len(), 3);
        let prompts: Vec<&str> = state.records().map(|r| r.prompt.as_str()).collect();
        assert_eq!(prompts, vec!["2", "3", "4"]);

        // "0" never made it into the window and counts as new
        assert_eq!(state.filter_new(vec![record("0", "r")]).len(), 1);
    }

    #[test]
    fn test_long_conversation_is_not_resent() {
        let mut state = CaptureState::new();
        let page: Vec<_> = (0..60).map(|i| record(&format!("q{}", i), "a")).collect();

        let first = state.filter_new(page.clone());
        assert_eq!(first.len(), DEFAULT_CAPTURE_WINDOW);
        assert_eq!(first[0].prompt, "q10");
        for _ in 0..3 {
            assert!(state.filter_new(page.clone()).is_empty());
        }
        assert_eq!(state.len(), DEFAULT_CAPTURE_WINDOW);
    }

    #[test]
    fn test_seen_turns_stay_in_window() {
        let mut state = CaptureState::with_window(3);
        state.filter_new(vec![record("a", "1"), record("b", "1"), record("c", "1")]);

        // "a" is still on the page, so it must not be evicted by the new turns
        let page = vec![record("a", "1"), record("d", "1"), record("e", "1")];
        assert_eq!(state.filter_new(page.clone()).len(), 2);
        assert!(state.filter_new(page).is_empty());
    }
}
