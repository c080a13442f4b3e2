// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Certificate authority signers.
//!
//! A [`Signer`] is built per request from a CA service's annotations. Signing
//! runs in two steps: [`Signer::prepare_inputs`] validates the caller and the
//! request parameters and returns a typed [`SigningIntent`]; [`Signer::sign`]
//! loads the authority key and issues the certificate.
//!
//! ```rust,no_run
//! use ca_signer::{sign_request, CaContext, CaService, Role, SigningRequest};
//! # async fn run(context: CaContext, service: CaService) -> ca_signer::Result<()> {
//! let role = Role::parse("cucumber:host:hosts/web-01")?;
//! let request = SigningRequest::new()
//!     .with("csr", std::fs::read_to_string("web-01.csr").unwrap_or_default())
//!     .with("ttl", "PT1H");
//! let issued = sign_request(service, &context, &role, &request).await?;
//! println!("{}", issued.to_text());
//! # Ok(())
//! # }
//! ```

pub mod request;
pub mod ssh;
pub mod x509;

pub use request::{ParamValue, SigningRequest};
pub use ssh::{SshIntent, SshSigner};
pub use x509::{X509Intent, X509Signer};

use crate::error::{Error, Result};
use crate::role::{Authorizer, Role, SIGN_PRIVILEGE};
use crate::secrets::SecretResolver;
use crate::service::{CaKind, CaService, CaServiceConfig};
use serde::Serialize;
use std::sync::Arc;

/// Root segment of SPIFFE ids issued when none is configured.
pub const DEFAULT_SPIFFE_ROOT: &str = "conjur";

/// Collaborators shared by every signer.
#[derive(Clone)]
pub struct CaContext {
    pub secrets: Arc<dyn SecretResolver>,
    pub authorizer: Arc<dyn Authorizer>,
    pub spiffe_root: String,
}

impl CaContext {
    pub fn new(secrets: Arc<dyn SecretResolver>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            secrets,
            authorizer,
            spiffe_root: DEFAULT_SPIFFE_ROOT.to_string(),
        }
    }

    pub fn with_spiffe_root(mut self, root: impl Into<String>) -> Self {
        self.spiffe_root = root.into();
        self
    }

    /// Fail with `NotAuthorized` unless `role` may sign with `config`'s CA.
    pub(crate) async fn require_sign_privilege(
        &self,
        role: &Role,
        config: &CaServiceConfig,
    ) -> Result<()> {
        let allowed = self
            .authorizer
            .allowed_to(role, SIGN_PRIVILEGE, &config.service)
            .await?;
        if !allowed {
            tracing::warn!(
                role = %role,
                service = %config.service,
                "role is not permitted to sign"
            );
            return Err(Error::NotAuthorized);
        }
        Ok(())
    }
}

impl std::fmt::Debug for CaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaContext")
            .field("spiffe_root", &self.spiffe_root)
            .finish_non_exhaustive()
    }
}

/// Validated inputs for one signature.
#[derive(Debug, Clone)]
pub enum SigningIntent {
    X509(X509Intent),
    Ssh(SshIntent),
}

/// A freshly issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum IssuedCertificate {
    X509 {
        pem: String,
    },
    Ssh {
        key_type: String,
        /// Base64 certificate blob.
        blob: String,
    },
}

impl IssuedCertificate {
    /// Plain text form: the PEM, or `"<type> <base64>"`.
    pub fn to_text(&self) -> String {
        match self {
            IssuedCertificate::X509 { pem } => pem.clone(),
            IssuedCertificate::Ssh { key_type, blob } => format!("{} {}", key_type, blob),
        }
    }

    pub fn kind(&self) -> CaKind {
        match self {
            IssuedCertificate::X509 { .. } => CaKind::X509,
            IssuedCertificate::Ssh { .. } => CaKind::Ssh,
        }
    }
}

/// Signer for one CA service, selected by its `ca/kind` annotation.
#[derive(Debug)]
pub enum Signer {
    X509(X509Signer),
    Ssh(SshSigner),
}

impl Signer {
    /// Build the signer for `service`. Reads annotations only; no secrets
    /// are touched until [`Signer::sign`].
    pub fn create(service: CaService, context: CaContext) -> Result<Self> {
        let config = CaServiceConfig::from_service(service)?;
        tracing::debug!(
            service = %config.service,
            kind = %config.kind,
            max_ttl_secs = config.max_ttl.as_secs(),
            "selected certificate authority"
        );
        Ok(match config.kind {
            CaKind::X509 => Signer::X509(X509Signer::new(config, context)),
            CaKind::Ssh => Signer::Ssh(SshSigner::new(config, context)),
        })
    }

    pub fn kind(&self) -> CaKind {
        match self {
            Signer::X509(_) => CaKind::X509,
            Signer::Ssh(_) => CaKind::Ssh,
        }
    }

    pub fn config(&self) -> &CaServiceConfig {
        match self {
            Signer::X509(s) => s.config(),
            Signer::Ssh(s) => s.config(),
        }
    }

    pub async fn prepare_inputs(
        &self,
        role: &Role,
        request: &SigningRequest,
    ) -> Result<SigningIntent> {
        match self {
            Signer::X509(s) => s.prepare_inputs(role, request).await.map(SigningIntent::X509),
            Signer::Ssh(s) => s.prepare_inputs(role, request).await.map(SigningIntent::Ssh),
        }
    }

    pub async fn sign(&self, intent: SigningIntent) -> Result<IssuedCertificate> {
        match (self, intent) {
            (Signer::X509(s), SigningIntent::X509(intent)) => s.sign(intent).await,
            (Signer::Ssh(s), SigningIntent::Ssh(intent)) => s.sign(intent).await,
            (signer, _) => Err(Error::IntentMismatch(signer.kind().as_str())),
        }
    }
}

/// Intents are only valid for the service whose authorization produced them.
pub(crate) fn ensure_same_service(config: &CaServiceConfig, intent_service: &str) -> Result<()> {
    let signer_service = config.service.resource_id();
    if intent_service != signer_service {
        tracing::warn!(
            intent = intent_service,
            service = %signer_service,
            "refusing intent prepared by another CA service"
        );
        return Err(Error::IntentServiceMismatch {
            intent: intent_service.to_string(),
            signer: signer_service,
        });
    }
    Ok(())
}

/// Run the whole pipeline: select the signer, validate, sign.
pub async fn sign_request(
    service: CaService,
    context: &CaContext,
    role: &Role,
    request: &SigningRequest,
) -> Result<IssuedCertificate> {
    let signer = Signer::create(service, context.clone())?;
    let intent = signer.prepare_inputs(role, request).await?;
    signer.sign(intent).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::role::GrantAuthorizer;
    use crate::secrets::MemorySecrets;
    use crate::service::{CA_KIND_ANNOTATION, MAX_TTL_ANNOTATION};

    fn context() -> CaContext {
        CaContext::new(
            Arc::new(MemorySecrets::new()),
            Arc::new(GrantAuthorizer::default()),
        )
    }

    fn service(kind: Option<&str>) -> CaService {
        let svc = CaService::new("cucumber", "kitchen").with_annotation(MAX_TTL_ANNOTATION, "PT1H");
        match kind {
            Some(kind) => svc.with_annotation(CA_KIND_ANNOTATION, kind),
            None => svc,
        }
    }

    #[test]
    fn test_factory_selects_by_kind() {
        assert_eq!(
            Signer::create(service(Some("x509")), context()).unwrap().kind(),
            CaKind::X509
        );
        assert_eq!(
            Signer::create(service(Some("ssh")), context()).unwrap().kind(),
            CaKind::Ssh
        );
        assert_eq!(
            Signer::create(service(None), context()).unwrap().kind(),
            CaKind::X509
        );
    }

    #[test]
    fn test_factory_rejects_unknown_kind() {
        let err = Signer::create(service(Some("foo")), context()).unwrap_err();
        assert!(matches!(err, Error::UnsupportedCaType(ref v) if v == "foo"));
        assert!(err.to_string().contains("foo"));
    }

    #[test]
    fn test_default_spiffe_root() {
        assert_eq!(context().spiffe_root, "conjur");
        assert_eq!(context().with_spiffe_root("example.org").spiffe_root, "example.org");
    }

    #[test]
    fn test_issued_certificate_text() {
        let ssh = IssuedCertificate::Ssh {
            key_type: "ssh-rsa-cert-v01@openssh.com".into(),
            blob: "AAAA".into(),
        };
        assert_eq!(ssh.to_text(), "ssh-rsa-cert-v01@openssh.com AAAA");
        assert_eq!(ssh.kind(), CaKind::Ssh);
    }
}
