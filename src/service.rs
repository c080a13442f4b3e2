// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! CA service resources and the configuration read from their annotations.

use crate::error::{Error, Result};
use crate::policy::parse_duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Annotation selecting the certificate format.
pub const CA_KIND_ANNOTATION: &str = "ca/kind";
/// Annotation holding the maximum certificate lifetime.
pub const MAX_TTL_ANNOTATION: &str = "ca/max_ttl";
/// Annotation naming the secret that holds the authority private key.
pub const PRIVATE_KEY_ANNOTATION: &str = "ca/private-key";
/// Annotation naming the secret that holds the private key passphrase.
pub const PRIVATE_KEY_PASSWORD_ANNOTATION: &str = "ca/private-key-password";
/// Annotation naming the secret that holds the intermediate certificate chain.
pub const CERTIFICATE_CHAIN_ANNOTATION: &str = "ca/certificate-chain";

/// A configured CA webservice, as stored by the policy backend.
///
/// Identifiers look like `conjur/<service-id>/ca`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaService {
    pub account: String,
    pub identifier: String,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl CaService {
    pub fn new(account: impl Into<String>, service_id: &str) -> Self {
        Self {
            account: account.into(),
            identifier: Self::identifier_for(service_id),
            annotations: BTreeMap::new(),
        }
    }

    /// Builder-style helper used when assembling services in code.
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Resource identifier of the CA webservice for a service id.
    pub fn identifier_for(service_id: &str) -> String {
        format!("conjur/{}/ca", service_id)
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// The short service name: second segment of the identifier.
    pub fn service_id(&self) -> Result<&str> {
        self.identifier
            .split('/')
            .nth(1)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::InvalidServiceIdentifier(self.identifier.clone()))
    }

    /// Fully qualified resource id, `<account>:webservice:<identifier>`.
    pub fn resource_id(&self) -> String {
        format!("{}:webservice:{}", self.account, self.identifier)
    }
}

impl fmt::Display for CaService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource_id())
    }
}

/// Certificate format served by a CA service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaKind {
    X509,
    Ssh,
}

impl CaKind {
    /// Resolve the `ca/kind` annotation.
    ///
    /// An absent or empty annotation selects X.509. Any value other than
    /// `x509` or `ssh` is an error naming that value.
    pub fn from_annotation(value: Option<&str>) -> Result<Self> {
        match value.map(str::trim) {
            None | Some("") => Ok(CaKind::X509),
            Some("x509") => Ok(CaKind::X509),
            Some("ssh") => Ok(CaKind::Ssh),
            Some(other) => Err(Error::UnsupportedCaType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CaKind::X509 => "x509",
            CaKind::Ssh => "ssh",
        }
    }
}

impl fmt::Display for CaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Parsed, immutable view of a CA service's annotations.
#[derive(Debug, Clone)]
pub struct CaServiceConfig {
    pub service: CaService,
    pub service_id: String,
    pub kind: CaKind,
    pub max_ttl: Duration,
    pub private_key_var: Option<String>,
    pub private_key_password_var: Option<String>,
    pub certificate_chain_var: Option<String>,
}

impl CaServiceConfig {
    pub fn from_service(service: CaService) -> Result<Self> {
        let kind = CaKind::from_annotation(service.annotation(CA_KIND_ANNOTATION))?;
        let service_id = service.service_id()?.to_string();

        let raw_ttl = service
            .annotation(MAX_TTL_ANNOTATION)
            .ok_or_else(|| Error::MissingAnnotation {
                service: service.identifier.clone(),
                annotation: MAX_TTL_ANNOTATION,
            })?;
        let max_ttl = parse_duration(raw_ttl).map_err(|reason| Error::InvalidMaxTtl {
            value: raw_ttl.to_string(),
            reason,
        })?;

        let slot = |key: &str| {
            service
                .annotation(key)
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        };

        Ok(Self {
            kind,
            service_id,
            max_ttl,
            private_key_var: slot(PRIVATE_KEY_ANNOTATION),
            private_key_password_var: slot(PRIVATE_KEY_PASSWORD_ANNOTATION),
            certificate_chain_var: slot(CERTIFICATE_CHAIN_ANNOTATION),
            service,
        })
    }

    pub fn account(&self) -> &str {
        &self.service.account
    }
}
