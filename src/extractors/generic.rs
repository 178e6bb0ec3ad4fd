//! Heuristic extractor for pages no platform extractor recognises
//!
//! Guesses the conversation container by scoring element profiles, then pairs
//! the container's children into turns. Best effort only: the guarantee is
//! that it never panics and emits well-formed records, not that it is right.

use regex::Regex;
use scraper::{ElementRef, Html};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

use super::{text_content, ConversationExtractor};
use crate::models::{ConversationRecord, Platform};

/// Tags that never hold conversation content
const EXCLUDED_TAGS: &[&str] = &[
    "html", "head", "script", "style", "meta", "link", "noscript", "title", "template", "svg",
    "path", "iframe", "br", "hr", "img", "input", "textarea", "select", "option", "button",
];

const CONTAINER_KEYWORDS: &[&str] = &["chat", "message", "conversation", "dialog", "thread"];

/// Serializable description of an element, everything the scorer looks at
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementProfile {
    pub tag: String,
    pub class_list: Vec<String>,
    pub id: Option<String>,
    pub child_count: usize,
    /// `div`/`p`/`span` descendants
    pub content_descendants: usize,
    pub depth: usize,
    /// Fraction of the viewport covered, when the markup states a size
    pub area_ratio: Option<f64>,
    /// Effective `overflow-y` value
    pub overflow: Option<String>,
}

impl ElementProfile {
    pub fn from_element(element: ElementRef<'_>) -> Self {
        let content_descendants = element
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .filter(|e| is_content_tag(e.value().name()))
            .count();
        let depth = element
            .ancestors()
            .filter(|node| node.value().is_element())
            .count();
        Self::with_counts(element, depth, content_descendants)
    }

    fn with_counts(element: ElementRef<'_>, depth: usize, content_descendants: usize) -> Self {
        let value = element.value();
        let class_list: Vec<String> = value.classes().map(str::to_string).collect();
        let child_count = element.children().filter_map(ElementRef::wrap).count();
        let style = value.attr("style").unwrap_or("");

        Self {
            tag: value.name().to_string(),
            id: value.id().map(str::to_string),
            child_count,
            content_descendants,
            depth,
            area_ratio: area_ratio_from_style(style),
            overflow: overflow_from_markup(style, &class_list),
            class_list,
        }
    }

    fn keyword_in_class(&self) -> bool {
        contains_keyword(&self.class_list.join(" "))
    }

    fn keyword_in_id(&self) -> bool {
        self.id.as_deref().map(contains_keyword).unwrap_or(false)
    }

    /// Keyword-bearing with >3 children, or wide and deep enough without one
    pub fn is_candidate(&self) -> bool {
        let keyword = self.keyword_in_class() || self.keyword_in_id();
        (self.child_count > 3 && keyword) || (self.child_count > 5 && self.content_descendants > 5)
    }
}

fn is_content_tag(tag: &str) -> bool {
    matches!(tag, "div" | "p" | "span")
}

/// Every element in document order with its depth and `div`/`p`/`span`
/// descendant count, computed in one forward and one backward pass.
fn layout_counts(document: &Html) -> Vec<(ElementRef<'_>, usize, usize)> {
    let elements: Vec<ElementRef<'_>> = document
        .root_element()
        .descendants()
        .filter_map(ElementRef::wrap)
        .collect();

    let mut depth = HashMap::with_capacity(elements.len());
    for element in &elements {
        let d = element
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|parent| depth.get(&parent.id()).map(|d: &usize| d + 1))
            .unwrap_or(0);
        depth.insert(element.id(), d);
    }

    // Children follow their parent in document order, so walking backwards
    // sees every child's total before the parent needs it
    let mut content = HashMap::with_capacity(elements.len());
    for element in elements.iter().rev() {
        let total: usize = element
            .children()
            .filter_map(ElementRef::wrap)
            .map(|child| {
                content.get(&child.id()).copied().unwrap_or(0)
                    + usize::from(is_content_tag(child.value().name()))
            })
            .sum();
        content.insert(element.id(), total);
    }

    elements
        .into_iter()
        .map(|element| {
            let d = depth.get(&element.id()).copied().unwrap_or(0);
            let c = content.get(&element.id()).copied().unwrap_or(0);
            (element, d, c)
        })
        .collect()
}

fn contains_keyword(text: &str) -> bool {
    let text = text.to_lowercase();
    CONTAINER_KEYWORDS.iter().any(|k| text.contains(k))
}

fn style_size_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|;)\s*(width|height)\s*:\s*([0-9]*\.?[0-9]+)\s*(%|vw|vh)")
            .expect("static regex")
    })
}

fn style_overflow_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:^|;)\s*overflow(?:-y)?\s*:\s*(scroll|auto|hidden|visible)").expect("static regex")
    })
}

/// Viewport fraction from inline `width`/`height` in %, vw or vh.
/// Block elements span the full width, so a missing width counts as 100%.
fn area_ratio_from_style(style: &str) -> Option<f64> {
    let mut width = None;
    let mut height = None;
    for caps in style_size_regex().captures_iter(style) {
        let Ok(value) = caps[2].parse::<f64>() else {
            continue;
        };
        let fraction = (value / 100.0).clamp(0.0, 1.0);
        match caps[1].to_lowercase().as_str() {
            "width" => width = Some(fraction),
            _ => height = Some(fraction),
        }
    }
    height.map(|h| h * width.unwrap_or(1.0))
}

fn overflow_from_markup(style: &str, classes: &[String]) -> Option<String> {
    if let Some(caps) = style_overflow_regex().captures_iter(style).last() {
        return Some(caps[1].to_lowercase());
    }
    classes.iter().find_map(|class| match class.as_str() {
        "overflow-y-auto" | "overflow-auto" => Some("auto".to_string()),
        "overflow-y-scroll" | "overflow-scroll" => Some("scroll".to_string()),
        _ => None,
    })
}

/// Container scoring weights. Tuned by hand, adjust freely.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub conversation_keyword: u32,
    pub keyword: u32,
    pub many_children: u32,
    pub several_children: u32,
    pub few_children: u32,
    pub depth_sweet_spot: u32,
    pub depth_near: u32,
    pub area_sweet_spot: u32,
    pub area_visible: u32,
    pub scrollable: u32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            conversation_keyword: 15,
            keyword: 10,
            many_children: 15,
            several_children: 10,
            few_children: 5,
            depth_sweet_spot: 10,
            depth_near: 5,
            area_sweet_spot: 15,
            area_visible: 10,
            scrollable: 10,
        }
    }
}

impl ScoreWeights {
    pub fn score(&self, profile: &ElementProfile) -> u32 {
        let mut score = 0;

        score += self.keyword_score(&profile.class_list.join(" "));
        if let Some(id) = &profile.id {
            score += self.keyword_score(id);
        }

        score += match profile.child_count {
            n if n > 20 => self.many_children,
            n if n > 10 => self.several_children,
            n if n > 3 => self.few_children,
            _ => 0,
        };

        score += match profile.depth {
            3..=6 => self.depth_sweet_spot,
            2 | 7..=10 => self.depth_near,
            _ => 0,
        };

        if let Some(ratio) = profile.area_ratio {
            if (0.3..=0.8).contains(&ratio) {
                score += self.area_sweet_spot;
            } else if ratio > 0.1 {
                score += self.area_visible;
            }
        }

        if matches!(profile.overflow.as_deref(), Some("scroll") | Some("auto")) {
            score += self.scrollable;
        }

        score
    }

    fn keyword_score(&self, text: &str) -> u32 {
        let text = text.to_lowercase();
        if text.contains("conversation") {
            self.conversation_keyword
        } else if CONTAINER_KEYWORDS.iter().any(|k| text.contains(k)) {
            self.keyword
        } else {
            0
        }
    }
}

/// Score with the default weights
pub fn score_candidate(profile: &ElementProfile) -> u32 {
    ScoreWeights::default().score(profile)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRole {
    User,
    Assistant,
}

/// A non-empty direct child of the chosen container
#[derive(Debug, Clone, PartialEq)]
pub struct TurnItem {
    pub text: String,
    pub role: Option<TurnRole>,
}

impl TurnItem {
    pub fn new(text: &str, role: Option<TurnRole>) -> Self {
        Self {
            text: text.to_string(),
            role,
        }
    }
}

fn role_from_value(value: &str) -> Option<TurnRole> {
    match value.trim().to_lowercase().as_str() {
        "user" | "human" => Some(TurnRole::User),
        "assistant" | "ai" | "bot" | "model" => Some(TurnRole::Assistant),
        _ => None,
    }
}

fn role_from_class(class: &str) -> Option<TurnRole> {
    let class = class.to_lowercase();
    if class.contains("user") || class.contains("human") {
        return Some(TurnRole::User);
    }
    // "ai" only as a whole dash-separated segment, "main"/"container" must not match
    if class.contains("assistant") || class.split(['-', '_']).any(|segment| segment == "ai") {
        return Some(TurnRole::Assistant);
    }
    None
}

pub fn role_hint(element: ElementRef<'_>) -> Option<TurnRole> {
    let value = element.value();
    let from_attr = value
        .attr("data-role")
        .or_else(|| value.attr("data-message-author-role"))
        .and_then(role_from_value);
    from_attr.or_else(|| value.classes().find_map(role_from_class))
}

/// Group items into (prompt, response) pairs.
///
/// Role hints win when any item has one; otherwise items strictly alternate.
pub fn group_turns(items: &[TurnItem]) -> Vec<(String, String)> {
    if items.iter().any(|item| item.role.is_some()) {
        group_by_role(items)
    } else {
        group_alternating(items)
    }
}

fn group_by_role(items: &[TurnItem]) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    let mut pending: Option<(String, String)> = None;

    for item in items {
        match item.role {
            Some(TurnRole::User) => {
                if let Some(pair) = pending.take() {
                    pairs.push(pair);
                }
                pending = Some((item.text.clone(), String::new()));
            }
            Some(TurnRole::Assistant) => {
                // Assistant text before any prompt has nothing to pair with
                if let Some((_, response)) = pending.as_mut() {
                    if !response.is_empty() {
                        response.push('\n');
                    }
                    response.push_str(&item.text);
                }
            }
            None => {}
        }
    }

    pairs.extend(pending);
    pairs
}

fn group_alternating(items: &[TurnItem]) -> Vec<(String, String)> {
    items
        .chunks(2)
        .map(|chunk| {
            let prompt = chunk[0].text.clone();
            let response = chunk.get(1).map(|item| item.text.clone()).unwrap_or_default();
            (prompt, response)
        })
        .collect()
}

fn blank_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n\s*\n").expect("static regex"))
}

/// Last resort: blank-line paragraphs paired sequentially
pub fn pair_paragraphs(text: &str) -> Vec<(String, String)> {
    let paragraphs: Vec<String> = blank_line_regex()
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect();

    paragraphs
        .chunks(2)
        .map(|chunk| (chunk[0].clone(), chunk.get(1).cloned().unwrap_or_default()))
        .collect()
}

#[derive(Debug, Clone, Default)]
pub struct GenericExtractor {
    weights: ScoreWeights,
}

impl GenericExtractor {
    pub fn with_weights(weights: ScoreWeights) -> Self {
        Self { weights }
    }

    /// Highest-scoring candidate; ties keep the earliest in document order.
    pub fn find_container<'a>(&self, document: &'a Html) -> Option<(ElementRef<'a>, u32)> {
        let mut best: Option<(ElementRef<'a>, u32)> = None;

        for (element, depth, content_descendants) in layout_counts(document) {
            if EXCLUDED_TAGS.contains(&element.value().name()) {
                continue;
            }
            // Cheap pre-filter: no candidate has three or fewer children
            if element.children().filter_map(ElementRef::wrap).count() <= 3 {
                continue;
            }
            let profile = ElementProfile::with_counts(element, depth, content_descendants);
            if !profile.is_candidate() {
                continue;
            }
            let score = self.weights.score(&profile);
            if best.map(|(_, s)| score > s).unwrap_or(true) {
                best = Some((element, score));
            }
        }

        best.filter(|(_, score)| *score > 0)
    }
}

impl ConversationExtractor for GenericExtractor {
    fn platform(&self) -> Platform {
        Platform::Unknown
    }

    fn matches(&self, _url: &str) -> bool {
        true
    }

    fn extract(&self, document: &Html, url: &str) -> Option<Vec<ConversationRecord>> {
        let (container, score) = self.find_container(document)?;
        debug!(
            "🧭 Heuristic container <{}> scored {}",
            container.value().name(),
            score
        );

        let items: Vec<TurnItem> = container
            .children()
            .filter_map(ElementRef::wrap)
            .filter_map(|child| {
                let text = text_content(child);
                if text.is_empty() {
                    None
                } else {
                    Some(TurnItem {
                        text,
                        role: role_hint(child),
                    })
                }
            })
            .collect();

        let mut pairs = group_turns(&items);
        if pairs.is_empty() {
            pairs = pair_paragraphs(&container.text().collect::<String>());
        }
        if pairs.is_empty() {
            return None;
        }

        Some(
            pairs
                .iter()
                .map(|(prompt, response)| ConversationRecord::new(Platform::Unknown, prompt, response, url))
                .collect(),
        )
    }
}


#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_layout_counts_agree(depths in proptest::collection::vec(0usize..4, 1..20)) {
            let mut html = String::new();
            for depth in &depths {
                html.push_str(&"<div>".repeat(depth + 1));
                html.push_str("<p>t</p><span>s</span>");
                html.push_str(&"</div>".repeat(depth + 1));
            }
            let document = Html::parse_document(&html);
            for (element, depth, content) in layout_counts(&document) {
                let profile = ElementProfile::from_element(element);
                prop_assert_eq!((depth, content), (profile.depth, profile.content_descendants));
            }
        }

        #[test]
        fn prop_extract_never_panics(html in ".{0,400}") {
            let document = Html::parse_document(&html);
            if let Some(records) = GenericExtractor::default().extract(&document, "https://x.test") {
                for record in records {
                    prop_assert_eq!(record.platform, Platform::Unknown);
                    prop_assert_eq!(record.prompt.trim(), record.prompt.as_str());
                }
            }
        }

        #[test]
        fn prop_alternation_pairs_cover_items(texts in proptest::collection::vec("[a-z]{1,8}", 0..20)) {
            let items: Vec<TurnItem> = texts.iter().map(|t| TurnItem::new(t, None)).collect();
            let pairs = group_turns(&items);
            prop_assert_eq!(pairs.len(), (texts.len() + 1) / 2);
        }
    }
}
