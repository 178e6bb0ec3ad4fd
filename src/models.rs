use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Chat platform a conversation was captured from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Platform {
    ChatGPT,
    Claude,
    Bard,
    #[serde(rename = "KIMI")]
    Kimi,
    #[serde(rename = "豆包")]
    Doubao,
    Deepseek,
    Unknown,
}

impl Platform {
    pub fn name(&self) -> &'static str {
        match self {
            Platform::ChatGPT => "ChatGPT",
            Platform::Claude => "Claude",
            Platform::Bard => "Bard",
            Platform::Kimi => "KIMI",
            Platform::Doubao => "豆包",
            Platform::Deepseek => "Deepseek",
            Platform::Unknown => "Unknown",
        }
    }

    /// URL substrings identifying each platform's chat pages.
    pub fn url_patterns(&self) -> &'static [&'static str] {
        match self {
            Platform::ChatGPT => &["chat.openai.com", "chatgpt.com"],
            Platform::Claude => &["claude.ai"],
            Platform::Bard => &["bard.google.com", "gemini.google.com"],
            Platform::Kimi => &["kimi.moonshot.cn", "kimi.com"],
            Platform::Doubao => &["doubao.com"],
            Platform::Deepseek => &["chat.deepseek.com"],
            Platform::Unknown => &[],
        }
    }

    /// Detect the platform by URL substring, `Unknown` when nothing matches
    pub fn detect(url: &str) -> Platform {
        let url = url.to_lowercase();
        Platform::known()
            .iter()
            .copied()
            .find(|p| p.url_patterns().iter().any(|pat| url.contains(pat)))
            .unwrap_or(Platform::Unknown)
    }

    pub fn known() -> &'static [Platform] {
        &[
            Platform::ChatGPT,
            Platform::Claude,
            Platform::Bard,
            Platform::Kimi,
            Platform::Doubao,
            Platform::Deepseek,
        ]
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One captured (prompt, response) pair plus metadata.
///
/// `timestamp` is the capture time, not the time the message was sent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationRecord {
    pub platform: Platform,
    pub prompt: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
}

impl ConversationRecord {
    pub fn new(platform: Platform, prompt: &str, response: &str, url: &str) -> Self {
        Self {
            platform,
            prompt: prompt.trim().to_string(),
            response: response.trim().to_string(),
            timestamp: Utc::now(),
            url: url.to_string(),
        }
    }

    /// Deduplication key: exact prompt and response, no normalization
    pub fn same_turn(&self, other: &ConversationRecord) -> bool {
        self.prompt == other.prompt && self.response == other.response
    }
}

/// Remote persistence status mirrored into local storage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    #[default]
    Idle,
    Saving,
    Saved,
    Error,
}

impl SaveStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaveStatus::Idle => "idle",
            SaveStatus::Saving => "saving",
            SaveStatus::Saved => "saved",
            SaveStatus::Error => "error",
        }
    }
}

/// `updateSaveStatus` broadcast pushed to every status listener
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub action: String,
    pub status: SaveStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StatusUpdate {
    pub const ACTION: &'static str = "updateSaveStatus";

    pub fn new(status: SaveStatus, timestamp: Option<DateTime<Utc>>, error: Option<String>) -> Self {
        Self {
            action: Self::ACTION.to_string(),
            status,
            timestamp,
            error,
        }
    }
}
