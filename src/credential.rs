//! OAuth2 credential bundle and its durable storage

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::error::{IntegrationError, Result};

/// OAuth2 token bundle enabling authenticated calls
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub scopes: BTreeSet<String>,
}

impl Credential {
    /// Whether the access token expires within `margin` of `now`
    pub fn expires_within(&self, margin: ChronoDuration, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + margin
    }

    /// Whether every scope in `required` has been granted
    pub fn covers<S: AsRef<str>>(&self, required: &[S]) -> bool {
        required.iter().all(|s| self.scopes.contains(s.as_ref()))
    }

    /// A credential may be used only if it is unexpired and carries every required scope
    pub fn is_valid_for<S: AsRef<str>>(
        &self,
        required: &[S],
        margin: ChronoDuration,
        now: DateTime<Utc>,
    ) -> bool {
        !self.expires_within(margin, now) && self.covers(required)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"<redacted>")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "<redacted>"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .finish()
    }
}

/// Persistence for a single credential bundle
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Absence is not an error
    async fn load(&self) -> Result<Option<Credential>>;
    async fn save(&self, credential: &Credential) -> Result<()>;
    async fn clear(&self) -> Result<()>;
}

/// JSON file on local disk, readable only by the owner
#[derive(Debug, Clone)]
pub struct FileCredentialStore {
    path: PathBuf,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "credential".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Result<Option<Credential>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No stored credential at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => {
                warn!("Failed to read stored credential {:?}: {}", self.path, e);
                return Ok(None);
            }
        };

        match serde_json::from_str::<Credential>(&content) {
            Ok(credential) => Ok(Some(credential)),
            Err(e) => {
                warn!(
                    "Stored credential {:?} is corrupt and will be ignored: {}",
                    self.path, e
                );
                Ok(None)
            }
        }
    }

    async fn save(&self, credential: &Credential) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.map_err(|e| {
                    IntegrationError::transport(format!(
                        "Failed to create credential directory {:?}: {}",
                        parent, e
                    ))
                })?;
            }
        }

        let json = serde_json::to_string_pretty(credential).map_err(|e| {
            IntegrationError::transport(format!("Failed to serialize credential: {}", e))
        })?;

        let temp = self.temp_path();
        write_private(&temp, json.as_bytes()).await.map_err(|e| {
            IntegrationError::transport(format!("Failed to write credential {:?}: {}", temp, e))
        })?;
        tokio::fs::rename(&temp, &self.path).await.map_err(|e| {
            IntegrationError::transport(format!(
                "Failed to move credential into place at {:?}: {}",
                self.path, e
            ))
        })?;

        info!("Credential persisted to {:?}", self.path);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => {
                info!("Stored credential removed from {:?}", self.path);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(IntegrationError::transport(format!(
                "Failed to remove credential {:?}: {}",
                self.path, e
            ))),
        }
    }
}

/// Write a secrets file that is owner-only (0600 on Unix) from the moment it exists.
/// A leftover file at `path` is removed first so its permissions are never reused.
async fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed stale temporary credential {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(path).await?;
    file.write_all(contents).await?;
    file.sync_all().await
}
