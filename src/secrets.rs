// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Secret resolution for authority key material.

use crate::error::{Error, Result};
use crate::fs::sanitize_path_component;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

/// Fetches the current value of a named secret for an account.
///
/// `Ok(None)` means the secret exists in policy but has no value, or does not
/// exist at all. Backend failures are reported as errors.
#[async_trait]
pub trait SecretResolver: Send + Sync {
    async fn resolve(&self, account: &str, name: &str) -> Result<Option<Vec<u8>>>;
}

/// Fully qualified id of a secret variable.
pub fn secret_id(account: &str, name: &str) -> String {
    format!("{}:variable:{}", account, name)
}

/// In-memory secrets keyed by [`secret_id`].
#[derive(Debug, Default)]
pub struct MemorySecrets {
    values: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemorySecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, account: &str, name: &str, value: impl Into<Vec<u8>>) {
        // A panicked writer cannot leave the map half-updated
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(secret_id(account, name), value.into());
    }

    pub fn with(self, account: &str, name: &str, value: impl Into<Vec<u8>>) -> Self {
        self.insert(account, name, value);
        self
    }
}

#[async_trait]
impl SecretResolver for MemorySecrets {
    async fn resolve(&self, account: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(&secret_id(account, name)).cloned())
    }
}

/// Secrets stored as files, one per variable, at `<root>/<account>/<name>`.
///
/// Variable names may contain `/`; each segment becomes a directory level.
#[derive(Debug, Clone)]
pub struct DirectorySecrets {
    root: PathBuf,
}

impl DirectorySecrets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Location of a secret on disk. Rejects names that would escape the
    /// account directory.
    pub fn path_for(&self, account: &str, name: &str) -> Result<PathBuf> {
        let mut path = self.root.join(sanitize_path_component(account)?);
        if name.is_empty() {
            return Err(Error::InvalidSecretName {
                name: name.to_string(),
                reason: "name cannot be empty".into(),
            });
        }
        for segment in name.split('/') {
            let segment = sanitize_path_component(segment).map_err(|e| match e {
                Error::InvalidSecretName { reason, .. } => Error::InvalidSecretName {
                    name: name.to_string(),
                    reason,
                },
                other => other,
            })?;
            path.push(segment);
        }
        Ok(path)
    }
}

#[async_trait]
impl SecretResolver for DirectorySecrets {
    async fn resolve(&self, account: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(account, name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(secret = %secret_id(account, name), "secret file not present");
                Ok(None)
            }
            Err(e) => Err(Error::ReadFile { path, source: e }),
        }
    }
}
