//! Persisted network identity (SSID and secret).
//!
//! Bringing the network up is the host's job; the client only needs to
//! load what was provisioned and save what a pairing flow produced.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::BigiotError;

/// Credentials of the network the device joins.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkIdentity {
    pub ssid: String,
    pub secret: String,
}

impl NetworkIdentity {
    pub fn new(ssid: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for NetworkIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetworkIdentity")
            .field("ssid", &self.ssid)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Durable storage for one [`NetworkIdentity`].
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// The saved identity, or `NotConfigured` if none was ever saved.
    async fn load(&self) -> Result<NetworkIdentity, BigiotError>;

    async fn save(&self, identity: &NetworkIdentity) -> Result<(), BigiotError>;
}

/// Stores the identity as a JSON file.
#[derive(Debug, Clone)]
pub struct FileIdentityStore {
    path: PathBuf,
}

impl FileIdentityStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl IdentityStore for FileIdentityStore {
    async fn load(&self) -> Result<NetworkIdentity, BigiotError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no saved network identity");
                return Err(BigiotError::NotConfigured);
            }
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&raw).map_err(|e| {
            BigiotError::Storage(format!("{}: {e}", self.path.display()))
        })
    }

    async fn save(&self, identity: &NetworkIdentity) -> Result<(), BigiotError> {
        let json = serde_json::to_vec_pretty(identity)
            .map_err(|e| BigiotError::Storage(e.to_string()))?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target, then rename over it.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, &json).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        info!(path = %self.path.display(), ssid = %identity.ssid, "network identity saved");
        Ok(())
    }
}
