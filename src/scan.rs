//! Batch extraction over a directory of saved chat pages

use indicatif::ProgressBar;
use rayon::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::extractors::extract_conversations;
use crate::models::ConversationRecord;
use crate::page::declared_url;

#[derive(Debug, Clone)]
pub struct SnapshotResult {
    pub path: PathBuf,
    pub url: String,
    /// `None` when no conversation could be found (or the file was unreadable)
    pub records: Option<Vec<ConversationRecord>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: usize,
    pub with_conversation: usize,
    pub records: usize,
}

impl ScanSummary {
    pub fn from_results(results: &[SnapshotResult]) -> Self {
        let mut summary = Self {
            files: results.len(),
            ..Default::default()
        };
        for result in results {
            if let Some(records) = &result.records {
                summary.with_conversation += 1;
                summary.records += records.len();
            }
        }
        summary
    }
}

/// `.html`/`.htm` files under `dir`, sorted for stable output
pub fn find_snapshots(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("⚠️  Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case("html") || ext.eq_ignore_ascii_case("htm"))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

/// Extract every snapshot in parallel. The page URL is the one the snapshot
/// declares, else `default_url`, else the file's own `file://` URL.
pub fn scan_snapshots(paths: &[PathBuf], default_url: Option<&str>, progress: Option<&ProgressBar>) -> Vec<SnapshotResult> {
    paths
        .par_iter()
        .map(|path| {
            let result = scan_one(path, default_url);
            if let Some(pb) = progress {
                pb.inc(1);
            }
            result
        })
        .collect()
}

fn scan_one(path: &Path, default_url: Option<&str>) -> SnapshotResult {
    let fallback_url = || {
        default_url
            .map(str::to_string)
            .unwrap_or_else(|| format!("file://{}", path.display()))
    };

    let html = match fs::read_to_string(path) {
        Ok(html) => html,
        Err(e) => {
            warn!("⚠️  Failed to read {:?}: {}", path, e);
            return SnapshotResult {
                path: path.to_path_buf(),
                url: fallback_url(),
                records: None,
            };
        }
    };

    let url = declared_url(&html).unwrap_or_else(fallback_url);
    let records = extract_conversations(&html, &url);
    debug!(
        "{:?}: {} turns",
        path,
        records.as_ref().map(Vec::len).unwrap_or(0)
    );

    SnapshotResult {
        path: path.to_path_buf(),
        url,
        records,
    }
}
