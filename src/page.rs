//! Page sources
//!
//! A page is an HTML snapshot plus the URL it was taken from. The watcher turns
//! changes in a snapshot file into mutation batches for the scheduler.

use anyhow::{Context, Result};
use scraper::Html;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::extractors::first_match;
use crate::scheduler::{Mutation, MutationScheduler};

#[derive(Debug, Clone)]
pub struct PageSnapshot {
    pub url: String,
    pub html: String,
}

impl PageSnapshot {
    pub fn digest(&self) -> String {
        digest_html(&self.html)
    }
}

pub fn digest_html(html: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(html.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub trait PageSource: Send + Sync {
    fn snapshot(&self) -> Result<PageSnapshot>;
}

/// Snapshot file on disk, re-read on every capture
pub struct FileSnapshotSource {
    path: PathBuf,
    url: String,
}

impl FileSnapshotSource {
    pub fn new(path: impl Into<PathBuf>, url: &str) -> Self {
        Self {
            path: path.into(),
            url: url.to_string(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PageSource for FileSnapshotSource {
    fn snapshot(&self) -> Result<PageSnapshot> {
        let html = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read snapshot {:?}", self.path))?;
        Ok(PageSnapshot {
            url: self.url.clone(),
            html,
        })
    }
}

/// In-memory page whose content can be swapped, for embedding and tests
#[derive(Clone)]
pub struct StaticPageSource {
    inner: Arc<Mutex<PageSnapshot>>,
}

impl StaticPageSource {
    pub fn new(url: &str, html: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PageSnapshot {
                url: url.to_string(),
                html: html.to_string(),
            })),
        }
    }

    pub fn set_html(&self, html: &str) {
        if let Ok(mut page) = self.inner.lock() {
            page.html = html.to_string();
        }
    }
}

impl PageSource for StaticPageSource {
    fn snapshot(&self) -> Result<PageSnapshot> {
        let page = self
            .inner
            .lock()
            .map_err(|_| anyhow::anyhow!("page lock poisoned"))?;
        Ok(page.clone())
    }
}

/// URL a saved page declares for itself via canonical link or `og:url`
pub fn declared_url(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let element = first_match(
        &document,
        &["link[rel=\"canonical\"]", "meta[property=\"og:url\"]"],
    )?;
    element
        .value()
        .attr("href")
        .or_else(|| element.value().attr("content"))
        .map(str::trim)
        .filter(|url| !url.is_empty())
        .map(str::to_string)
}

/// Poll a snapshot file and report each content change as a `childList` batch.
/// Runs until the task is dropped or aborted.
pub async fn watch_snapshot(path: PathBuf, scheduler: Arc<MutationScheduler>, poll_interval: Duration) {
    info!("👀 Watching {:?} every {:?}", path, poll_interval);
    let mut interval = tokio::time::interval(poll_interval);
    let mut last_digest: Option<String> = None;
    // Set while the file is missing, so its first content counts as a change
    let mut read_failed = false;

    loop {
        interval.tick().await;
        let html = match tokio::fs::read_to_string(&path).await {
            Ok(html) => html,
            Err(e) => {
                if !read_failed {
                    warn!("⚠️  Could not read {:?}: {}", path, e);
                }
                read_failed = true;
                continue;
            }
        };

        let digest = digest_html(&html);
        let recovered = std::mem::take(&mut read_failed);
        if last_digest.as_deref() == Some(digest.as_str()) && !recovered {
            continue;
        }
        if last_digest.is_some() || recovered {
            debug!("🔄 Snapshot changed ({})", &digest[..12]);
            scheduler.on_mutation_batch(&[Mutation::ChildList, Mutation::Subtree]);
        }
        last_digest = Some(digest);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;
    use std::io::Write;

    #[test]
    fn test_declared_url() {
        let html = r#"<html><head><link rel="canonical" href="https://claude.ai/chat/42"></head></html>"#;
        assert_eq!(declared_url(html).as_deref(), Some("https://claude.ai/chat/42"));

        let og = r#"<html><head><meta property="og:url" content=" https://chatgpt.com/c/7 "></head></html>"#;
        assert_eq!(declared_url(og).as_deref(), Some("https://chatgpt.com/c/7"));

        assert_eq!(declared_url("<p>no head</p>"), None);
    }

    #[test]
    fn test_file_source_rereads() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "<main>one</main>").unwrap();
        let source = FileSnapshotSource::new(file.path(), "https://chatgpt.com/c/1");
        let first = source.snapshot().unwrap();

        std::fs::write(file.path(), "<main>two</main>").unwrap();
        let second = source.snapshot().unwrap();
        assert_ne!(first.digest(), second.digest());
        assert_eq!(second.url, "https://chatgpt.com/c/1");
    }

    #[test]
    fn test_missing_file_is_error() {
        let source = FileSnapshotSource::new("/nonexistent/page.html", "https://x.test");
        assert!(source.snapshot().is_err());
    }

    #[test]
    fn test_static_source_swaps_html() {
        let source = StaticPageSource::new("https://x.test", "<p>a</p>");
        source.set_html("<p>b</p>");
        assert_eq!(source.snapshot().unwrap().html, "<p>b</p>");
    }
}
