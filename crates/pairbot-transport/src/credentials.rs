//! Durable per-session credential storage.
//!
//! Each session owns one namespace holding an opaque key → JSON value map.
//! [`FileCredentialStore`] keeps one directory per session and one file per
//! key, so an update only rewrites the keys it touches.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use pairbot_core::{Error, Result, SessionId};

/// Credential material of one session.
pub type Credentials = BTreeMap<String, Value>;

/// A patch to a session's credentials. `None` removes the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CredentialUpdate(pub BTreeMap<String, Option<Value>>);

impl CredentialUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a key.
    pub fn set(mut self, key: impl Into<String>, value: Value) -> Self {
        self.0.insert(key.into(), Some(value));
        self
    }

    /// Remove a key.
    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.0.insert(key.into(), None);
        self
    }

    /// Whether the update touches nothing.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Apply the update to an in-memory credential map.
    pub fn apply_to(&self, credentials: &mut Credentials) {
        for (key, value) in &self.0 {
            match value {
                Some(value) => {
                    credentials.insert(key.clone(), value.clone());
                }
                None => {
                    credentials.remove(key);
                }
            }
        }
    }
}

/// Durable key-value blob store with one namespace per session.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load a session's credentials, creating an empty namespace if absent.
    async fn load(&self, session_id: &SessionId) -> Result<Credentials>;

    /// Persist an update to a session's credentials.
    async fn apply(&self, session_id: &SessionId, update: &CredentialUpdate) -> Result<()>;

    /// All sessions that have a namespace.
    async fn list(&self) -> Result<Vec<SessionId>>;

    /// Remove a session's namespace permanently. Missing namespaces are fine.
    async fn delete(&self, session_id: &SessionId) -> Result<()>;
}

/// Credential store backed by one directory per session.
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    root: PathBuf,
}

impl FileCredentialStore {
    /// Create a store rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Namespace directory of a session.
    pub fn session_dir(&self, session_id: &SessionId) -> PathBuf {
        self.root.join(session_id.as_str())
    }

    fn key_path(&self, session_id: &SessionId, key: &str) -> PathBuf {
        self.session_dir(session_id)
            .join(format!("{}.json", urlencoding::encode(key)))
    }

    fn key_from_file_name(name: &str) -> Option<String> {
        let stem = name.strip_suffix(".json")?;
        urlencoding::decode(stem).ok().map(|k| k.into_owned())
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, session_id: &SessionId) -> Result<Credentials> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        let mut credentials = Credentials::new();
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(key) = name.to_str().and_then(Self::key_from_file_name) else {
                continue;
            };
            let raw = tokio::fs::read(entry.path()).await?;
            match serde_json::from_slice::<Value>(&raw) {
                Ok(value) => {
                    credentials.insert(key, value);
                }
                Err(e) => {
                    // A torn write leaves garbage; the remote will re-issue the key.
                    warn!(
                        "Skipping unreadable credential key: session={}, key={}, error={}",
                        session_id, key, e
                    );
                }
            }
        }

        debug!(
            "Loaded credentials: session={}, keys={}",
            session_id,
            credentials.len()
        );
        Ok(credentials)
    }

    async fn apply(&self, session_id: &SessionId, update: &CredentialUpdate) -> Result<()> {
        let dir = self.session_dir(session_id);
        tokio::fs::create_dir_all(&dir).await?;

        for (key, value) in &update.0 {
            let path = self.key_path(session_id, key);
            match value {
                Some(value) => {
                    let tmp = path.with_extension("json.tmp");
                    tokio::fs::write(&tmp, serde_json::to_vec(value)?).await?;
                    tokio::fs::rename(&tmp, &path).await?;
                }
                None => match tokio::fs::remove_file(&path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        Ok(())
    }

    async fn list(&self) -> Result<Vec<SessionId>> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| SessionId::new(name).ok())
            {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn delete(&self, session_id: &SessionId) -> Result<()> {
        match tokio::fs::remove_dir_all(self.session_dir(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Credentials(format!(
                "failed to delete session {session_id}: {e}"
            ))),
        }
    }
}
