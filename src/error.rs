// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("There is no CA with ID: {service_id} (account '{account}')")]
    CaNotFound { account: String, service_id: String },

    #[error("'{0}' wasn't in the available certificate authority types")]
    UnsupportedCaType(String),

    #[error("CA service '{service}' is missing the '{annotation}' annotation")]
    MissingAnnotation {
        service: String,
        annotation: &'static str,
    },

    #[error("Invalid ca/max_ttl '{value}': {reason}")]
    InvalidMaxTtl { value: String, reason: String },

    #[error("Invalid CA service identifier '{0}': expected conjur/<service-id>/ca")]
    InvalidServiceIdentifier(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Requestor is not a host")]
    RequestorNotHost,

    #[error("Role is not authorized to sign.")]
    NotAuthorized,

    #[error("Signing parameter '{0}' is missing.")]
    MissingParameter(&'static str),

    #[error("Signing parameter '{0}' must be a single value")]
    UnexpectedList(&'static str),

    #[error("CSR cannot be parsed: {0}")]
    MalformedCsr(String),

    #[error("CSR cannot be verified")]
    CsrSignatureInvalid,

    #[error("Public key cannot be parsed: {0}")]
    MalformedPublicKey(String),

    #[error("Invalid ttl '{value}': {reason}")]
    InvalidTtl { value: String, reason: String },

    #[error("Signing parameter 'principals' must name at least one principal")]
    NoPrincipals,

    #[error("Role identity '{value}' cannot be used in a certificate: {reason}")]
    InvalidIdentity { value: String, reason: String },

    #[error("Invalid role id '{0}': expected <account>:<kind>:<identifier>")]
    InvalidRoleId(String),

    #[error("CA key material unavailable ({slot}): {reason}")]
    KeyMaterialUnavailable { slot: String, reason: String },

    #[error("Invalid secret name '{name}': {reason}")]
    InvalidSecretName { name: String, reason: String },

    #[error("Secret store failure: {0}")]
    SecretStore(String),

    #[error("Authorization check failed: {0}")]
    Authorization(String),

    #[error("Signing intent does not belong to a {0} certificate authority")]
    IntentMismatch(&'static str),

    #[error("Signing intent was authorized by {intent}, not {signer}")]
    IntentServiceMismatch { intent: String, signer: String },

    #[error("Certificate generation failed: {0}")]
    CertGen(#[from] rcgen::Error),

    #[error("SSH certificate generation failed: {0}")]
    SshCert(#[from] ssh_key::Error),

    #[error("Failed to encode response: {0}")]
    Render(#[from] serde_json::Error),

    #[error("Failed to encode certificate extension: {0}")]
    ExtensionEncoding(String),

    #[error("Invalid validity period: {0}")]
    InvalidValidity(String),

    #[error("Failed to parse certificate: {0}")]
    CertParse(String),

    #[error("Key encryption failed: {0}")]
    KeyEncryption(String),

    #[error("Failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid path (non-UTF8): {0}")]
    InvalidPath(PathBuf),
}

/// Broad class of a failure, used by the transport layer to pick a status
/// code and by callers deciding how loudly to log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Missing CA service or operator misconfiguration.
    Configuration,
    /// The caller sent a bad request.
    Validation,
    /// The caller is not permitted to sign.
    Authorization,
    /// Authority key or chain could not be loaded.
    KeyMaterial,
    /// Collaborator or encoding failure on our side.
    Internal,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::CaNotFound { .. }
            | Error::UnsupportedCaType(_)
            | Error::MissingAnnotation { .. }
            | Error::InvalidMaxTtl { .. }
            | Error::InvalidServiceIdentifier(_)
            | Error::Config(_) => ErrorCategory::Configuration,

            Error::MissingParameter(_)
            | Error::UnexpectedList(_)
            | Error::MalformedCsr(_)
            | Error::CsrSignatureInvalid
            | Error::MalformedPublicKey(_)
            | Error::InvalidTtl { .. }
            | Error::NoPrincipals
            | Error::InvalidIdentity { .. }
            | Error::InvalidRoleId(_) => ErrorCategory::Validation,

            Error::RequestorNotHost
            | Error::NotAuthorized
            | Error::IntentServiceMismatch { .. } => ErrorCategory::Authorization,

            Error::KeyMaterialUnavailable { .. } | Error::InvalidSecretName { .. } => {
                ErrorCategory::KeyMaterial
            }

            Error::SecretStore(_)
            | Error::Authorization(_)
            | Error::IntentMismatch(_)
            | Error::CertGen(_)
            | Error::SshCert(_)
            | Error::Render(_)
            | Error::ExtensionEncoding(_)
            | Error::InvalidValidity(_)
            | Error::CertParse(_)
            | Error::KeyEncryption(_)
            | Error::CreateDir { .. }
            | Error::ReadFile { .. }
            | Error::WriteFile { .. }
            | Error::InvalidPath(_) => ErrorCategory::Internal,
        }
    }

    /// Whether the failure is attributable to the caller's request rather
    /// than to the server.
    pub fn is_caller_fault(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Validation | ErrorCategory::Authorization
        ) || matches!(self, Error::CaNotFound { .. })
    }

    /// HTTP status the transport layer should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::CaNotFound { .. } => 404,
            _ => match self.category() {
                ErrorCategory::Validation => 400,
                ErrorCategory::Authorization => 403,
                ErrorCategory::Configuration
                | ErrorCategory::KeyMaterial
                | ErrorCategory::Internal => 500,
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
