//! Credential persistence
//!
//! [`CredentialStore`] owns the credential record. It sits on top of any
//! async [`KeyValueStore`]; the backend is responsible for serializing its own
//! concurrent reads and writes.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{watch, Mutex, RwLock};
use tokio_stream::wrappers::WatchStream;

use super::tokens::{expiry_from, must_refresh, Clock, Credential};

pub const ACCESS_TOKEN_KEY: &str = "access_token";
pub const REFRESH_TOKEN_KEY: &str = "refresh_token";
pub const EXPIRES_AT_KEY: &str = "expires_at";

const CREDENTIAL_KEYS: [&str; 3] = [ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, EXPIRES_AT_KEY];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("failed to read credential store: {0}")]
    Read(String),

    #[error("failed to write credential store: {0}")]
    Write(String),

    #[error("refusing to store a credential without a refresh value")]
    BlankRefresh,
}

/// Durable async key-value backend.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Write every entry in a single step; readers never observe a partial set.
    async fn put_all(&self, entries: &[(&str, String)]) -> Result<(), StoreError>;

    async fn remove_all(&self, keys: &[&str]) -> Result<(), StoreError>;
}

/// In-process backend. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put_all(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let mut guard = self.entries.write().await;
        for (key, value) in entries {
            guard.insert((*key).to_string(), value.clone());
        }
        Ok(())
    }

    async fn remove_all(&self, keys: &[&str]) -> Result<(), StoreError> {
        let mut guard = self.entries.write().await;
        for key in keys {
            guard.remove(*key);
        }
        Ok(())
    }
}

/// TOML file backend. The file holds a flat string table and is written
/// with owner-only permissions since it contains secrets.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    async fn read_table(&self) -> Result<BTreeMap<String, String>, StoreError> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(StoreError::Read(e.to_string())),
        };
        toml::from_str(&content).map_err(|e| StoreError::Read(e.to_string()))
    }

    async fn write_table(&self, table: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(dir) = self.path.parent() {
            tokio::fs::create_dir_all(dir)
                .await
                .map_err(|e| StoreError::Write(e.to_string()))?;
        }

        let content = toml::to_string(table).map_err(|e| StoreError::Write(e.to_string()))?;

        // Readers see either the old file or the new one, never a partial write.
        let tmp = self.path.with_extension("toml.tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }

        let mut file = options
            .open(&tmp)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;

        // A leftover temp file keeps its old mode; `mode` only applies on create.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            tokio::fs::set_permissions(&tmp, perms)
                .await
                .map_err(|e| StoreError::Write(e.to_string()))?;
        }

        file.write_all(content.as_bytes())
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        file.sync_all()
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;
        drop(file);

        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| StoreError::Write(e.to_string()))?;

        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_table().await?.remove(key))
    }

    async fn put_all(&self, entries: &[(&str, String)]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut table = self.read_table().await?;
        for (key, value) in entries {
            table.insert((*key).to_string(), value.clone());
        }
        self.write_table(&table).await
    }

    async fn remove_all(&self, keys: &[&str]) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut table = self.read_table().await?;
        for key in keys {
            table.remove(*key);
        }
        self.write_table(&table).await
    }
}

/// Read/write access to the single credential record of one session.
pub struct CredentialStore {
    kv: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    window: Duration,
    authenticated: watch::Sender<bool>,
}

impl CredentialStore {
    /// Open the store and seed the authenticated signal from what is persisted.
    pub async fn open(
        kv: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        window: Duration,
    ) -> Result<Self, StoreError> {
        let has_refresh = kv
            .get(REFRESH_TOKEN_KEY)
            .await?
            .is_some_and(|v| !v.trim().is_empty());
        let (authenticated, _) = watch::channel(has_refresh);

        Ok(Self {
            kv,
            clock,
            window,
            authenticated,
        })
    }

    pub fn now_secs(&self) -> u64 {
        self.clock.now_secs()
    }

    /// Persist a freshly issued pair. The expiry instant is `now + window`
    /// and is written in the same step as the access value.
    pub async fn save(&self, access_token: &str, refresh_token: &str) -> Result<(), StoreError> {
        if refresh_token.trim().is_empty() {
            return Err(StoreError::BlankRefresh);
        }

        let expires_at = expiry_from(self.clock.now_secs(), self.window);
        self.kv
            .put_all(&[
                (ACCESS_TOKEN_KEY, access_token.to_string()),
                (REFRESH_TOKEN_KEY, refresh_token.to_string()),
                (EXPIRES_AT_KEY, expires_at.to_string()),
            ])
            .await?;

        tracing::debug!("Credential saved, expires_at={}", expires_at);
        self.publish(true);
        Ok(())
    }

    pub async fn access_token(&self) -> Result<Option<String>, StoreError> {
        self.kv.get(ACCESS_TOKEN_KEY).await
    }

    pub async fn refresh_token(&self) -> Result<Option<String>, StoreError> {
        self.kv.get(REFRESH_TOKEN_KEY).await
    }

    pub async fn expires_at(&self) -> Result<Option<u64>, StoreError> {
        match self.kv.get(EXPIRES_AT_KEY).await? {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|_| StoreError::Read(format!("invalid {}: {:?}", EXPIRES_AT_KEY, raw))),
            None => Ok(None),
        }
    }

    /// Whole record, if all three fields are present.
    pub async fn credential(&self) -> Result<Option<Credential>, StoreError> {
        let (Some(access_token), Some(refresh_token), Some(expires_at)) = (
            self.access_token().await?,
            self.refresh_token().await?,
            self.expires_at().await?,
        ) else {
            return Ok(None);
        };

        Ok(Some(Credential {
            access_token,
            refresh_token,
            expires_at,
        }))
    }

    /// `now >= expires_at`. Any read failure or missing expiry counts as
    /// "must refresh".
    pub async fn should_refresh(&self) -> bool {
        match self.expires_at().await {
            Ok(Some(expires_at)) => must_refresh(expires_at, self.clock.now_secs()),
            Ok(None) => true,
            Err(e) => {
                tracing::warn!("Could not read credential expiry, forcing refresh: {}", e);
                true
            }
        }
    }

    /// Drop the whole record (sign-out).
    pub async fn clear(&self) -> Result<(), StoreError> {
        self.kv.remove_all(&CREDENTIAL_KEYS).await?;
        self.publish(false);
        Ok(())
    }

    /// Current value of the authenticated signal.
    pub fn is_authenticated(&self) -> bool {
        *self.authenticated.borrow()
    }

    /// Stream of the authenticated signal. Yields the current value first,
    /// then once per change of refresh-value presence.
    pub fn authenticated_signal(&self) -> WatchStream<bool> {
        WatchStream::new(self.authenticated.subscribe())
    }

    fn publish(&self, authenticated: bool) {
        self.authenticated.send_if_modified(|current| {
            if *current == authenticated {
                false
            } else {
                *current = authenticated;
                true
            }
        });
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore")
            .field("window", &self.window)
            .field("authenticated", &self.is_authenticated())
            .finish()
    }
}
