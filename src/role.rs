// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Authenticated callers and the authorization oracle consulted about them.

use crate::error::{Error, Result};
use crate::service::CaService;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Privilege required to obtain a certificate from a CA service.
pub const SIGN_PRIVILEGE: &str = "sign";

/// Role kind allowed to request X.509 certificates.
pub const HOST_KIND: &str = "host";

/// An authenticated caller, identified as `<account>:<kind>:<identifier>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Role {
    account: String,
    kind: String,
    identifier: String,
}

impl Role {
    pub fn new(
        account: impl Into<String>,
        kind: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            kind: kind.into(),
            identifier: identifier.into(),
        }
    }

    /// Parse a full role id. The identifier may itself contain `:`.
    pub fn parse(id: &str) -> Result<Self> {
        let mut parts = id.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(account), Some(kind), Some(identifier))
                if !account.is_empty() && !kind.is_empty() && !identifier.is_empty() =>
            {
                Ok(Self::new(account, kind, identifier))
            }
            _ => Err(Error::InvalidRoleId(id.to_string())),
        }
    }

    pub fn id(&self) -> String {
        format!("{}:{}:{}", self.account, self.kind, self.identifier)
    }

    pub fn account(&self) -> &str {
        &self.account
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_host(&self) -> bool {
        self.kind == HOST_KIND
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.account, self.kind, self.identifier)
    }
}

/// Answers "may this role perform this privilege on this resource".
#[async_trait]
pub trait Authorizer: Send + Sync {
    async fn allowed_to(&self, role: &Role, privilege: &str, resource: &CaService)
        -> Result<bool>;
}

/// One permission entry: `role` holds `privilege` on CA service `service`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Grant {
    pub role: String,
    #[serde(default = "default_privilege")]
    pub privilege: String,
    pub service: String,
}

fn default_privilege() -> String {
    SIGN_PRIVILEGE.to_string()
}

/// Authorizer backed by a static list of grants.
#[derive(Debug, Clone, Default)]
pub struct GrantAuthorizer {
    grants: Vec<Grant>,
}

impl GrantAuthorizer {
    pub fn new(grants: Vec<Grant>) -> Self {
        Self { grants }
    }

    pub fn grant(mut self, role: &Role, service_id: &str) -> Self {
        self.grants.push(Grant {
            role: role.id(),
            privilege: SIGN_PRIVILEGE.to_string(),
            service: service_id.to_string(),
        });
        self
    }
}

#[async_trait]
impl Authorizer for GrantAuthorizer {
    async fn allowed_to(
        &self,
        role: &Role,
        privilege: &str,
        resource: &CaService,
    ) -> Result<bool> {
        // Grants never cross accounts.
        if role.account() != resource.account {
            return Ok(false);
        }
        let service_id = resource.service_id()?;
        let role_id = role.id();
        Ok(self
            .grants
            .iter()
            .any(|g| g.role == role_id && g.privilege == privilege && g.service == service_id))
    }
}
