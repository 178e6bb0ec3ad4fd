//! Capture AI chat conversations from page snapshots.
//!
//! Pipeline: a page source feeds platform or heuristic extractors, new turns
//! are deduplicated and sent over a transport to a background sink that keeps
//! a bounded local history and forwards to a remote prompt API.

pub mod api;
pub mod background;
pub mod capture;
pub mod config;
pub mod dedup;
pub mod extractors;
pub mod messaging;
pub mod models;
pub mod page;
pub mod progress;
pub mod scan;
pub mod scheduler;
pub mod storage;
