// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use crate::ca::DEFAULT_SPIFFE_ROOT;
use crate::error::{Error, Result};
use crate::role::{Grant, Role};
use crate::service::{CaService, CaServiceConfig};
use directories::{BaseDirs, ProjectDirs};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Current config file version. Increment when making breaking changes.
const CONFIG_VERSION: u32 = 1;

/// Environment variable overriding the base directory.
pub const ROOT_ENV: &str = "CA_SIGNER_ROOT";

#[derive(Debug, Serialize, Deserialize)]
pub struct Config {
    /// Config file version for future migration support
    #[serde(default = "default_config_version")]
    pub config_version: u32,
    /// First path segment of issued SPIFFE ids
    #[serde(default = "default_spiffe_root")]
    pub spiffe_root: String,
    /// Where secret files live, if not `<base>/secrets`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_dir: Option<PathBuf>,
    #[serde(default)]
    pub services: Vec<ServiceEntry>,
    #[serde(default)]
    pub grants: Vec<Grant>,
}

/// One `[[services]]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceEntry {
    pub account: String,
    pub id: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl ServiceEntry {
    pub fn to_service(&self) -> CaService {
        CaService {
            account: self.account.clone(),
            identifier: CaService::identifier_for(&self.id),
            annotations: self.annotations.clone(),
        }
    }
}

fn default_config_version() -> u32 {
    CONFIG_VERSION
}

fn default_spiffe_root() -> String {
    DEFAULT_SPIFFE_ROOT.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            config_version: CONFIG_VERSION,
            spiffe_root: default_spiffe_root(),
            secrets_dir: None,
            services: Vec::new(),
            grants: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
    pub config: PathBuf,
    pub secrets: PathBuf,
}

impl Paths {
    pub fn new() -> Result<Self> {
        Ok(Self::at(Self::base_dir()?))
    }

    pub fn at(base: PathBuf) -> Self {
        Self {
            config: base.join("config.toml"),
            secrets: base.join("secrets"),
            base,
        }
    }

    fn base_dir() -> Result<PathBuf> {
        if let Ok(custom_root) = std::env::var(ROOT_ENV) {
            let path = PathBuf::from(&custom_root);
            if !path.is_absolute() {
                return Err(Error::Config(format!(
                    "{} must be an absolute path, got: {}",
                    ROOT_ENV, custom_root
                )));
            }
            return Ok(path);
        }

        if let Some(proj_dirs) = ProjectDirs::from("", "", "ca-signer") {
            Ok(proj_dirs.data_dir().to_path_buf())
        } else if let Some(base_dirs) = BaseDirs::new() {
            Ok(base_dirs.home_dir().join(".ca-signer"))
        } else {
            Err(Error::Config(format!(
                "Could not determine a data directory; set {}",
                ROOT_ENV
            )))
        }
    }

    /// Directory of the file-backed secret store.
    pub fn secrets_dir(&self, config: &Config) -> PathBuf {
        match &config.secrets_dir {
            Some(dir) if dir.is_absolute() => dir.clone(),
            Some(dir) => self.base.join(dir),
            None => self.secrets.clone(),
        }
    }

    pub fn ensure_dir(&self) -> Result<()> {
        if !self.base.exists() {
            std::fs::create_dir_all(&self.base).map_err(|e| Error::CreateDir {
                path: self.base.clone(),
                source: e,
            })?;
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
                path: path.to_path_buf(),
                source: e,
            })?;
            toml::from_str(&content).map_err(|e| Error::Config(e.to_string()))?
        } else {
            Self::default()
        };

        if Self::migrate(&mut config) && path.exists() {
            config.save(path)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Bring an older config up to the current version.
    /// Returns true if the config was modified.
    fn migrate(config: &mut Self) -> bool {
        if config.config_version >= CONFIG_VERSION {
            return false;
        }

        let mut current_version = config.config_version;
        while current_version < CONFIG_VERSION {
            match current_version {
                0 => {
                    // v0 files predate spiffe_root
                    if config.spiffe_root.trim().is_empty() {
                        config.spiffe_root = default_spiffe_root();
                    }
                    current_version = 1;
                }
                _ => {
                    tracing::warn!(version = current_version, "skipping unknown config version");
                    current_version += 1;
                }
            }
        }

        config.config_version = CONFIG_VERSION;
        true
    }

    fn validate(&self) -> Result<()> {
        if self.config_version > CONFIG_VERSION {
            tracing::warn!(
                found = self.config_version,
                supported = CONFIG_VERSION,
                "config.toml is newer than this ca-signer; some settings may be ignored"
            );
        }

        if self.spiffe_root.is_empty()
            || self.spiffe_root.contains('/')
            || !self.spiffe_root.is_ascii()
            || self.spiffe_root.contains(char::is_whitespace)
        {
            return Err(Error::Config(format!(
                "spiffe_root '{}' must be a non-empty ASCII name without '/'",
                self.spiffe_root
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for entry in &self.services {
            if entry.account.is_empty() || entry.id.is_empty() || entry.id.contains('/') {
                return Err(Error::Config(format!(
                    "service '{}' in account '{}' needs a non-empty account and an id without '/'",
                    entry.id, entry.account
                )));
            }
            if !seen.insert((entry.account.as_str(), entry.id.as_str())) {
                return Err(Error::Config(format!(
                    "service '{}' is defined twice in account '{}'",
                    entry.id, entry.account
                )));
            }
            // Surface bad annotations at load time instead of on first request
            CaServiceConfig::from_service(entry.to_service())
                .map_err(|e| Error::Config(format!("service '{}': {}", entry.id, e)))?;
        }

        for grant in &self.grants {
            Role::parse(&grant.role)
                .map_err(|e| Error::Config(format!("grant for '{}': {}", grant.service, e)))?;
        }

        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        crate::fs::atomic_write(path, content.as_bytes())
    }

    /// Look up a CA service by account and service id.
    pub fn find_service(&self, account: &str, service_id: &str) -> Result<CaService> {
        self.services
            .iter()
            .find(|s| s.account == account && s.id == service_id)
            .map(ServiceEntry::to_service)
            .ok_or_else(|| Error::CaNotFound {
                account: account.to_string(),
                service_id: service_id.to_string(),
            })
    }
}
