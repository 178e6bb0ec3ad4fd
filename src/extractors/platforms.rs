//! Platform-specific extractors
//!
//! Selectors are tuned against each platform's current markup and break when
//! a platform reships its UI. They are tunable constants, not contracts.

use scraper::{ElementRef, Html, Node};

use super::{first_match, pair_turns, parse_selector, text_content, ConversationExtractor};
use crate::models::{ConversationRecord, Platform};

/// ChatGPT: turns carry `data-message-author-role`, code blocks keep fences
pub struct ChatGptExtractor;

impl ChatGptExtractor {
    const CONTAINERS: &'static [&'static str] = &["main", "div[role=\"presentation\"]"];
    const TURNS: &'static str = "[data-message-author-role]";
}

impl ConversationExtractor for ChatGptExtractor {
    fn platform(&self) -> Platform {
        Platform::ChatGPT
    }

    fn extract(&self, document: &Html, url: &str) -> Option<Vec<ConversationRecord>> {
        let container = first_match(document, Self::CONTAINERS)?;
        let turn_selector = parse_selector(Self::TURNS)?;

        // (prompt, response) in page order
        let mut turns: Vec<(String, String)> = Vec::new();
        for turn in container.select(&turn_selector) {
            match turn.value().attr("data-message-author-role") {
                Some("user") => turns.push((text_content(turn), String::new())),
                Some("assistant") => {
                    if let Some((_, response)) = turns.last_mut() {
                        if !response.is_empty() {
                            response.push('\n');
                        }
                        response.push_str(&fenced_text(turn));
                    }
                }
                _ => {}
            }
        }

        if turns.is_empty() {
            return None;
        }

        Some(
            turns
                .iter()
                .map(|(prompt, response)| ConversationRecord::new(Platform::ChatGPT, prompt, response, url))
                .collect(),
        )
    }
}

/// Subtree text where every `<pre>` block is rendered as a fenced code block
pub(crate) fn fenced_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    push_fenced(element, &mut out);
    out.trim().to_string()
}

fn push_fenced(element: ElementRef<'_>, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => out.push_str(text),
            Node::Element(_) => {
                let Some(child_element) = ElementRef::wrap(child) else {
                    continue;
                };
                if child_element.value().name() == "pre" {
                    push_code_block(child_element, out);
                } else {
                    push_fenced(child_element, out);
                }
            }
            _ => {}
        }
    }
}

fn push_code_block(pre: ElementRef<'_>, out: &mut String) {
    // Header widgets ("Copy code", language label) live outside <code>
    let code = pre
        .descendants()
        .filter_map(ElementRef::wrap)
        .find(|e| e.value().name() == "code")
        .unwrap_or(pre);

    let language = code
        .value()
        .classes()
        .find_map(|class| class.strip_prefix("language-"))
        .unwrap_or("");
    let body = code.text().collect::<String>();

    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out.push_str("```");
    out.push_str(language);
    out.push('\n');
    out.push_str(body.trim_end_matches('\n'));
    out.push_str("\n```\n");
}

/// Extractor driven purely by a container selector list and two turn selectors
pub struct SelectorExtractor {
    platform: Platform,
    containers: &'static [&'static str],
    user_turn: &'static str,
    assistant_turn: &'static str,
}

impl SelectorExtractor {
    pub fn claude() -> Self {
        Self {
            platform: Platform::Claude,
            containers: &["div[data-testid=\"conversation\"]", "main"],
            user_turn: "[data-testid=\"user-message\"]",
            assistant_turn: ".font-claude-message",
        }
    }

    pub fn bard() -> Self {
        Self {
            platform: Platform::Bard,
            containers: &["chat-window", ".conversation-container", "main"],
            user_turn: "user-query",
            assistant_turn: "model-response",
        }
    }

    pub fn kimi() -> Self {
        Self {
            platform: Platform::Kimi,
            containers: &[".chat-content-list", ".chat-detail-main"],
            user_turn: ".chat-content-item-user .segment-content",
            assistant_turn: ".chat-content-item-assistant .segment-content",
        }
    }

    pub fn doubao() -> Self {
        Self {
            platform: Platform::Doubao,
            containers: &["[data-testid=\"message-list\"]", "main"],
            user_turn: "[data-testid=\"send_message\"]",
            assistant_turn: "[data-testid=\"receive_message\"]",
        }
    }

    pub fn deepseek() -> Self {
        Self {
            platform: Platform::Deepseek,
            containers: &["#chat-container", "div.ds-virtual-list", "main"],
            user_turn: ".ds-user-message",
            assistant_turn: ".ds-markdown",
        }
    }
}

impl ConversationExtractor for SelectorExtractor {
    fn platform(&self) -> Platform {
        self.platform
    }

    fn extract(&self, document: &Html, url: &str) -> Option<Vec<ConversationRecord>> {
        let container = first_match(document, self.containers)?;
        let user_selector = parse_selector(self.user_turn)?;
        let assistant_selector = parse_selector(self.assistant_turn)?;

        let prompts: Vec<String> = container.select(&user_selector).map(text_content).collect();
        if prompts.is_empty() {
            return None;
        }
        let responses: Vec<String> = container
            .select(&assistant_selector)
            .map(text_content)
            .collect();

        Some(pair_turns(self.platform, &prompts, &responses, url))
    }
}
