//! Local key/value storage
//!
//! Mirrors the extension's local storage area: JSON values under string keys,
//! kept in a single SQLite table.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{de::DeserializeOwned, Serialize};
use std::fs;
use std::path::Path;
use tracing::debug;

pub const KEY_CONVERSATION_HISTORY: &str = "conversationHistory";
pub const KEY_LAST_SAVED: &str = "lastSaved";
pub const KEY_SAVE_STATUS: &str = "saveStatus";
pub const KEY_AUTO_SAVE_ENABLED: &str = "autoSaveEnabled";
pub const KEY_AUTH_TOKEN: &str = "authToken";

pub struct LocalStore {
    conn: Connection,
}

impl LocalStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create storage directory {:?}", parent))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open storage at {:?}", path))?;
        debug!("Opened local storage at {:?}", path);
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory storage")?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS storage_local (
              key TEXT PRIMARY KEY,
              value TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to create storage table")?;
        Ok(Self { conn })
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let raw: Option<String> = self
            .conn
            .query_row(
                "SELECT value FROM storage_local WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("Failed to read key {}", key))?;

        match raw {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("Corrupt value stored under {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let raw = serde_json::to_string(value)?;
        self.conn
            .execute(
                "INSERT INTO storage_local (key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, raw],
            )
            .with_context(|| format!("Failed to write key {}", key))?;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM storage_local WHERE key = ?1", params![key])
            .with_context(|| format!("Failed to remove key {}", key))?;
        Ok(())
    }

    /// `autoSaveEnabled`, on unless explicitly switched off
    pub fn auto_save_enabled(&self) -> Result<bool> {
        Ok(self.get::<bool>(KEY_AUTO_SAVE_ENABLED)?.unwrap_or(true))
    }

    pub fn auth_token(&self) -> Result<Option<String>> {
        Ok(self
            .get::<String>(KEY_AUTH_TOKEN)?
            .filter(|token| !token.trim().is_empty()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_roundtrip_and_overwrite() {
        let store = LocalStore::open_in_memory().unwrap();
        assert_eq!(store.get::<String>("missing").unwrap(), None);

        store.set("panel", &vec![1, 2, 3]).unwrap();
        store.set("panel", &vec![4]).unwrap();
        assert_eq!(store.get::<Vec<i32>>("panel").unwrap(), Some(vec![4]));

        store.remove("panel").unwrap();
        assert_eq!(store.get::<Vec<i32>>("panel").unwrap(), None);
    }

    #[test]
    fn test_persists_on_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("storage.sqlite");
        {
            let store = LocalStore::open(&path).unwrap();
            store.set(KEY_AUTO_SAVE_ENABLED, &false).unwrap();
        }
        let store = LocalStore::open(&path).unwrap();
        assert!(!store.auto_save_enabled().unwrap());
    }

    #[test]
    fn test_defaults() {
        let store = LocalStore::open_in_memory().unwrap();
        assert!(store.auto_save_enabled().unwrap());
        assert_eq!(store.auth_token().unwrap(), None);
        store.set(KEY_AUTH_TOKEN, "  ").unwrap();
        assert_eq!(store.auth_token().unwrap(), None);
    }
}
