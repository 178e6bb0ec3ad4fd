//! Conversation extractors
//!
//! Each extractor reads a parsed page and produces conversation records.
//! `None` means "page not ready" (container or required turns missing) and is
//! never treated as an error: the next page mutation simply tries again.

pub mod generic;
pub mod platforms;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, warn};

use crate::models::{ConversationRecord, Platform};

pub use generic::GenericExtractor;
pub use platforms::{ChatGptExtractor, SelectorExtractor};

pub trait ConversationExtractor: Send + Sync {
    fn platform(&self) -> Platform;

    fn matches(&self, url: &str) -> bool {
        let url = url.to_lowercase();
        self.platform()
            .url_patterns()
            .iter()
            .any(|pattern| url.contains(pattern))
    }

    fn extract(&self, document: &Html, url: &str) -> Option<Vec<ConversationRecord>>;
}

pub fn get_all_extractors() -> Vec<Box<dyn ConversationExtractor>> {
    vec![
        Box::new(ChatGptExtractor),
        Box::new(SelectorExtractor::claude()),
        Box::new(SelectorExtractor::bard()),
        Box::new(SelectorExtractor::kimi()),
        Box::new(SelectorExtractor::doubao()),
        Box::new(SelectorExtractor::deepseek()),
    ]
}

/// Pick the platform extractor whose URL pattern matches, else the heuristic one
pub fn select_extractor(url: &str) -> Box<dyn ConversationExtractor> {
    match get_all_extractors().into_iter().find(|e| e.matches(url)) {
        Some(extractor) => {
            debug!("🎯 Using {} extractor for {}", extractor.platform().name(), url);
            extractor
        }
        None => {
            debug!("🔎 No platform matched {}, falling back to heuristic extraction", url);
            Box::new(GenericExtractor::default())
        }
    }
}

/// Parse an HTML snapshot and run the extractor selected for `url`
pub fn extract_conversations(html: &str, url: &str) -> Option<Vec<ConversationRecord>> {
    let document = Html::parse_document(html);
    select_extractor(url).extract(&document, url)
}

/// Parse a selector, logging and skipping it when invalid
pub(crate) fn parse_selector(css: &str) -> Option<Selector> {
    match Selector::parse(css) {
        Ok(selector) => Some(selector),
        Err(e) => {
            warn!("⚠️  Invalid selector {:?}: {:?}", css, e);
            None
        }
    }
}

/// First element matching any selector, tried in order
pub(crate) fn first_match<'a>(document: &'a Html, selectors: &[&str]) -> Option<ElementRef<'a>> {
    selectors
        .iter()
        .filter_map(|css| parse_selector(css))
        .find_map(|selector| document.select(&selector).next())
}

/// Whole-subtree text content, trimmed
pub(crate) fn text_content(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Pair the i-th user turn with the i-th assistant turn; a missing assistant
/// turn becomes an empty response.
pub(crate) fn pair_turns(
    platform: Platform,
    prompts: &[String],
    responses: &[String],
    url: &str,
) -> Vec<ConversationRecord> {
    prompts
        .iter()
        .enumerate()
        .map(|(i, prompt)| {
            let response = responses.get(i).map(String::as_str).unwrap_or("");
            ConversationRecord::new(platform, prompt, response, url)
        })
        .collect()
}
