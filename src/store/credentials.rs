//! Credential store backends
//!
//! The file backend keeps one directory per tenant under the configured
//! root, holding a single `resume.bin`. With a passphrase configured the
//! blob is sealed (see [`super::crypto`]); without one it is written as is.

use async_trait::async_trait;
use dashmap::DashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::crypto::{self, SealingKey, SALT_LEN};
use super::{CredentialStore, ResumeMaterial, StoreError};
use crate::types::TenantId;

const RESUME_FILE: &str = "resume.bin";
const SALT_FILE: &str = ".salt";

/// Filesystem-backed credential store
pub struct FileCredentialStore {
    root: PathBuf,
    key: Option<SealingKey>,
}

impl FileCredentialStore {
    /// Open (creating if needed) a store rooted at `root`.
    ///
    /// With a passphrase, the per-store salt is read from `root/.salt` or
    /// generated on first use, and the sealing key is derived off the async
    /// runtime.
    pub async fn open(
        root: impl Into<PathBuf>,
        passphrase: Option<String>,
    ) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;

        let key = match passphrase {
            Some(passphrase) => {
                let passphrase = Zeroizing::new(passphrase);
                let salt = load_or_create_salt(&root).await?;
                let key = tokio::task::spawn_blocking(move || {
                    SealingKey::derive(passphrase.as_bytes(), &salt)
                })
                .await
                .map_err(|e| StoreError::Crypto(format!("key derivation task failed: {e}")))??;
                info!(root = %root.display(), "Credential sealing enabled");
                Some(key)
            }
            None => None,
        };

        Ok(Self { root, key })
    }

    #[cfg(test)]
    pub(crate) fn with_key(root: impl Into<PathBuf>, key: Option<SealingKey>) -> Self {
        Self {
            root: root.into(),
            key,
        }
    }

    fn tenant_dir(&self, tenant: &TenantId) -> PathBuf {
        self.root.join(tenant.as_str())
    }
}

async fn load_or_create_salt(root: &Path) -> Result<[u8; SALT_LEN], StoreError> {
    let path = root.join(SALT_FILE);
    match tokio::fs::read(&path).await {
        Ok(bytes) => bytes
            .as_slice()
            .try_into()
            .map_err(|_| StoreError::Corrupt(format!("{} has the wrong length", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let salt = crypto::generate_random_bytes::<SALT_LEN>();
            tokio::fs::write(&path, salt).await?;
            Ok(salt)
        }
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self, tenant: &TenantId) -> Result<Option<ResumeMaterial>, StoreError> {
        let path = self.tenant_dir(tenant).join(RESUME_FILE);
        let blob = match tokio::fs::read(&path).await {
            Ok(blob) => Zeroizing::new(blob),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let plain = match (&self.key, crypto::is_sealed(&blob)) {
            (Some(key), true) => crypto::open(key, &blob)?.to_vec(),
            (None, true) => {
                return Err(StoreError::Crypto(
                    "credentials are sealed but no key is configured".into(),
                ))
            }
            (Some(_), false) => {
                debug!(tenant_id = %tenant, "Loaded unsealed credentials; they are sealed on next save");
                blob.to_vec()
            }
            (None, false) => blob.to_vec(),
        };

        Ok(Some(ResumeMaterial::new(plain)))
    }

    async fn save(&self, tenant: &TenantId, material: &ResumeMaterial) -> Result<(), StoreError> {
        let dir = self.tenant_dir(tenant);
        tokio::fs::create_dir_all(&dir).await?;

        let blob = match &self.key {
            Some(key) => crypto::seal(key, material.as_bytes())?,
            None => material.as_bytes().to_vec(),
        };

        let tmp = dir.join(format!("{}.tmp", RESUME_FILE));
        tokio::fs::write(&tmp, &blob).await?;
        tokio::fs::rename(&tmp, dir.join(RESUME_FILE)).await?;

        debug!(tenant_id = %tenant, bytes = material.len(), "Saved resume material");
        Ok(())
    }

    async fn purge(&self, tenant: &TenantId) -> Result<(), StoreError> {
        match tokio::fs::remove_dir_all(self.tenant_dir(tenant)).await {
            Ok(()) => {
                info!(tenant_id = %tenant, "Purged stored credentials");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory credential store
#[derive(Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<TenantId, ResumeMaterial>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.entries.contains_key(tenant)
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load(&self, tenant: &TenantId) -> Result<Option<ResumeMaterial>, StoreError> {
        Ok(self.entries.get(tenant).map(|entry| entry.value().clone()))
    }

    async fn save(&self, tenant: &TenantId, material: &ResumeMaterial) -> Result<(), StoreError> {
        self.entries.insert(tenant.clone(), material.clone());
        Ok(())
    }

    async fn purge(&self, tenant: &TenantId) -> Result<(), StoreError> {
        self.entries.remove(tenant);
        Ok(())
    }
}
