//! Durable key/value storage for auth state

use crate::error::{Result, SessionError};
use crate::structs::TokenRecord;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const TOKEN_EXPIRY_KEY: &str = "token_expiry";
pub const USER_INFO_KEY: &str = "user_info";

/// String key/value storage, shaped after the browser's `localStorage`.
#[async_trait]
pub trait SessionStorage: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> Result<()>;

    async fn remove_item(&self, key: &str) -> Result<()>;
}

/// File-backed storage: one JSON object per file.
pub struct FileSessionStorage {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileSessionStorage {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let contents = fs::read_to_string(&self.path).await?;
        if contents.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    async fn write_all(&self, items: &BTreeMap<String, String>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(items)?).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStorage for FileSessionStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.read_all().await?.remove(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.read_all().await?;
        items.insert(key.to_string(), value.to_string());
        self.write_all(&items).await
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut items = self.read_all().await?;
        if items.remove(key).is_some() {
            self.write_all(&items).await?;
        }
        Ok(())
    }
}

/// Process-local storage; state is lost on exit.
#[derive(Default)]
pub struct MemorySessionStorage {
    items: parking_lot::Mutex<HashMap<String, String>>,
}

impl MemorySessionStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStorage for MemorySessionStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>> {
        Ok(self.items.lock().get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<()> {
        self.items.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<()> {
        self.items.lock().remove(key);
        Ok(())
    }
}

/// Loads the persisted token record.
///
/// A stored access token without a usable expiry is treated as no session.
pub async fn load_token_record(storage: &dyn SessionStorage) -> Result<Option<TokenRecord>> {
    let Some(access_token) = storage.get_item(ACCESS_TOKEN_KEY).await? else {
        return Ok(None);
    };
    let expires_at = match storage.get_item(TOKEN_EXPIRY_KEY).await? {
        Some(raw) => parse_expiry(&raw),
        None => None,
    };
    let Some(expires_at) = expires_at else {
        warn!("Stored access token has no valid expiry, ignoring it");
        return Ok(None);
    };
    let refresh_token = storage
        .get_item(REFRESH_TOKEN_KEY)
        .await?
        .unwrap_or_default();
    let user_info = match storage.get_item(USER_INFO_KEY).await? {
        Some(raw) => serde_json::from_str(&raw).ok(),
        None => None,
    };

    Ok(Some(TokenRecord {
        access_token,
        refresh_token,
        expires_at,
        user_info,
    }))
}

pub async fn save_token_record(storage: &dyn SessionStorage, record: &TokenRecord) -> Result<()> {
    // Expiry first: a reader never sees a new access token with the old expiry.
    storage
        .set_item(
            TOKEN_EXPIRY_KEY,
            &record.expires_at.timestamp_millis().to_string(),
        )
        .await?;
    storage
        .set_item(ACCESS_TOKEN_KEY, &record.access_token)
        .await?;
    storage
        .set_item(REFRESH_TOKEN_KEY, &record.refresh_token)
        .await?;
    match &record.user_info {
        Some(info) => {
            storage
                .set_item(USER_INFO_KEY, &serde_json::to_string(info)?)
                .await
        }
        None => storage.remove_item(USER_INFO_KEY).await,
    }
}

pub async fn clear_token_record(storage: &dyn SessionStorage) -> Result<()> {
    let mut first_error = None;
    for key in [
        ACCESS_TOKEN_KEY,
        REFRESH_TOKEN_KEY,
        TOKEN_EXPIRY_KEY,
        USER_INFO_KEY,
    ] {
        if let Err(e) = storage.remove_item(key).await {
            warn!("Failed to remove '{}' from session storage: {}", key, e);
            first_error.get_or_insert(e);
        }
    }
    match first_error {
        Some(e) => Err(SessionError::StorageError(e.to_string())),
        None => Ok(()),
    }
}

fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    raw.trim()
        .parse::<i64>()
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}
