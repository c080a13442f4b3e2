// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! OpenSSH user certificates.

use super::request::{SigningRequest, PRINCIPALS_PARAM, PUBLIC_KEY_PARAM};
use super::{CaContext, IssuedCertificate};
use crate::error::{Error, Result};
use crate::keys;
use crate::policy::{effective_ttl, random_ssh_serial, ValidityWindow};
use crate::role::Role;
use crate::service::CaServiceConfig;
use rand::RngCore;
use ssh_key::certificate::{Builder, CertType, Certificate};
use ssh_key::{Algorithm, PublicKey};
use std::time::Duration;

/// Validated SSH signing inputs.
#[derive(Debug, Clone)]
pub struct SshIntent {
    service: String,
    role: Role,
    public_key: PublicKey,
    principals: Vec<String>,
    requested_ttl: Duration,
}

impl SshIntent {
    /// Resource id of the CA service that authorized this intent.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub fn principals(&self) -> &[String] {
        &self.principals
    }

    pub fn requested_ttl(&self) -> Duration {
        self.requested_ttl
    }
}

#[derive(Debug)]
pub struct SshSigner {
    config: CaServiceConfig,
    context: CaContext,
}

impl SshSigner {
    pub fn new(config: CaServiceConfig, context: CaContext) -> Self {
        Self { config, context }
    }

    pub fn config(&self) -> &CaServiceConfig {
        &self.config
    }

    pub async fn prepare_inputs(&self, role: &Role, request: &SigningRequest) -> Result<SshIntent> {
        self.context.require_sign_privilege(role, &self.config).await?;

        let public_key = parse_rsa_public_key(request.single(PUBLIC_KEY_PARAM)?)
            .inspect_err(|e| tracing::warn!(role = %role, error = %e, "rejected public key"))?;

        let principals = request.list(PRINCIPALS_PARAM)?;
        if principals.is_empty() {
            return Err(Error::NoPrincipals);
        }
        let requested_ttl = request.ttl()?;

        tracing::debug!(
            role = %role,
            principals = principals.len(),
            ttl_secs = requested_ttl.as_secs(),
            "prepared SSH intent"
        );
        Ok(SshIntent {
            service: self.config.service.resource_id(),
            role: role.clone(),
            public_key,
            principals,
            requested_ttl,
        })
    }

    pub async fn sign(&self, intent: SshIntent) -> Result<IssuedCertificate> {
        super::ensure_same_service(&self.config, &intent.service)?;
        let authority =
            keys::load_ssh_authority(&self.config, self.context.secrets.as_ref()).await?;

        let ttl = effective_ttl(intent.requested_ttl, self.config.max_ttl);
        let window = ValidityWindow::starting_now(ttl)?;
        let serial = random_ssh_serial();

        let mut nonce = [0u8; 32];
        rand::rng().fill_bytes(&mut nonce);

        let mut builder = Builder::new(
            nonce.to_vec(),
            intent.public_key.key_data().clone(),
            window.not_before(),
            window.not_after(),
        )?;
        builder.serial(serial)?;
        builder.key_id(intent.role.id())?;
        builder.cert_type(CertType::User)?;
        for principal in &intent.principals {
            builder.valid_principal(principal.as_str())?;
        }
        let cert = builder.sign(&authority)?;

        let (key_type, blob) = split_openssh(&cert.to_openssh()?)?;
        tracing::info!(
            service = %self.config.service,
            role = %intent.role,
            serial,
            ttl_secs = ttl.as_secs(),
            "issued SSH certificate"
        );
        Ok(IssuedCertificate::Ssh { key_type, blob })
    }
}

/// Parse `ssh-rsa AAAA... [comment]`. Other key algorithms are refused.
pub fn parse_rsa_public_key(text: &str) -> Result<PublicKey> {
    let key = PublicKey::from_openssh(text.trim())
        .map_err(|e| Error::MalformedPublicKey(e.to_string()))?;
    match key.algorithm() {
        Algorithm::Rsa { .. } => Ok(key),
        other => Err(Error::MalformedPublicKey(format!(
            "expected an ssh-rsa key, got {}",
            other
        ))),
    }
}

fn split_openssh(encoded: &str) -> Result<(String, String)> {
    let mut parts = encoded.split_whitespace();
    match (parts.next(), parts.next()) {
        (Some(key_type), Some(blob)) => Ok((key_type.to_string(), blob.to_string())),
        _ => Err(Error::CertParse(
            "encoded SSH certificate is missing its type or body".into(),
        )),
    }
}

/// Summary of an OpenSSH certificate, used by `inspect`.
#[derive(Debug, Clone)]
pub struct SshCertInfo {
    pub key_type: String,
    pub cert_type: &'static str,
    pub key_id: String,
    pub serial: u64,
    pub principals: Vec<String>,
    pub valid_after: u64,
    pub valid_before: u64,
    pub signing_key_fingerprint: String,
}

impl SshCertInfo {
    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.valid_before.saturating_sub(self.valid_after))
    }
}

pub fn parse_ssh_certificate(text: &str) -> Result<SshCertInfo> {
    let text = text.trim();
    let cert = Certificate::from_openssh(text)
        .map_err(|e| Error::CertParse(format!("Invalid OpenSSH certificate: {}", e)))?;
    let (key_type, _) = split_openssh(text)?;
    Ok(SshCertInfo {
        key_type,
        cert_type: if cert.cert_type().is_user() {
            "user"
        } else {
            "host"
        },
        key_id: cert.key_id().to_string(),
        serial: cert.serial(),
        principals: cert.valid_principals().to_vec(),
        valid_after: cert.valid_after(),
        valid_before: cert.valid_before(),
        signing_key_fingerprint: cert
            .signature_key()
            .fingerprint(ssh_key::HashAlg::Sha256)
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const RSA_PUB: &str = include_str!("../../tests/fixtures/user_rsa.pub");
    const ED25519_PUB: &str = include_str!("../../tests/fixtures/user_ed25519.pub");

    #[test]
    fn test_accepts_rsa_public_key() {
        let key = parse_rsa_public_key(RSA_PUB).unwrap();
        assert!(matches!(key.algorithm(), Algorithm::Rsa { .. }));
    }

    #[test]
    fn test_rejects_other_algorithms() {
        assert!(matches!(
            parse_rsa_public_key(ED25519_PUB),
            Err(Error::MalformedPublicKey(_))
        ));
    }

    #[test]
    fn test_rejects_garbage_public_key() {
        assert!(matches!(
            parse_rsa_public_key("ssh-rsa not-base64!"),
            Err(Error::MalformedPublicKey(_))
        ));
        assert!(matches!(
            parse_rsa_public_key(""),
            Err(Error::MalformedPublicKey(_))
        ));
    }

    #[test]
    fn test_split_openssh() {
        let (key_type, blob) =
            split_openssh("ssh-rsa-cert-v01@openssh.com AAAAB3 comment").unwrap();
        assert_eq!(key_type, "ssh-rsa-cert-v01@openssh.com");
        assert_eq!(blob, "AAAAB3");
        assert!(split_openssh("lonely").is_err());
    }
}
