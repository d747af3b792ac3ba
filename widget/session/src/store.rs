//! Cookie-equivalent client storage.
//!
//! The host environment supplies the real binding (browser cookies and
//! local storage); `MemoryStore` backs tests and headless embedding.

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chrono::{DateTime, Utc};

/// Attributes applied to a persisted entry.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub path: String,
    pub expires: DateTime<Utc>,
    pub secure: bool,
}

impl StoreOptions {
    /// Path-scoped, secure entry expiring at the given time.
    pub fn session(expires: DateTime<Utc>) -> Self {
        Self { path: "/".to_string(), expires, secure: true }
    }
}

/// Durable (per-visitor) key-value storage.
///
/// Write failures are non-fatal to callers: chat remains usable without
/// persistence, so the keeper proceeds as if no session existed.
pub trait SessionStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str, options: &StoreOptions) -> Result<()>;
    fn remove(&self, key: &str);
}

/// In-memory store honoring entry expiry.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (String, DateTime<Utc>)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemoryStore {
    fn get(&self, key: &str) -> Option<String> {
        let entries = self.entries.lock().unwrap();
        let (value, expires) = entries.get(key)?;
        if *expires < Utc::now() {
            return None;
        }
        Some(value.clone())
    }

    fn set(&self, key: &str, value: &str, options: &StoreOptions) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(key.to_string(), (value.to_string(), options.expires));
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.lock().unwrap().remove(key);
    }
}
