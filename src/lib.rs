// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Short-lived X.509 and SSH certificates issued by configured CA services.
//!
//! ```rust,no_run
//! use ca_signer::{
//!     sign_request, CaContext, Config, DirectorySecrets, GrantAuthorizer, Paths, Role,
//!     SigningRequest,
//! };
//! use std::sync::Arc;
//!
//! # async fn run() -> ca_signer::Result<()> {
//! let paths = Paths::new()?;
//! let config = Config::load(&paths.config)?;
//! let context = CaContext::new(
//!     Arc::new(DirectorySecrets::new(paths.secrets_dir(&config))),
//!     Arc::new(GrantAuthorizer::new(config.grants.clone())),
//! )
//! .with_spiffe_root(config.spiffe_root.clone());
//!
//! let service = config.find_service("cucumber", "kitchen")?;
//! let role = Role::parse("cucumber:user:alice")?;
//! let request = SigningRequest::new()
//!     .with("public_key", "ssh-rsa AAAA...")
//!     .with("principals", "alice")
//!     .with("ttl", "PT1H");
//! let issued = sign_request(service, &context, &role, &request).await?;
//! println!("{}", issued.to_text());
//! # Ok(())
//! # }
//! ```

/// Signer factory and the X.509 / SSH signers.
pub mod ca;
/// Configuration handling.
pub mod config;
/// Error types.
pub mod error;
/// Filesystem utilities.
pub mod fs;
/// Authority key material loading.
pub mod keys;
/// Lifetime and serial number policy.
pub mod policy;
/// Response rendering.
pub mod render;
/// Callers and authorization.
pub mod role;
/// Secret resolution.
pub mod secrets;
/// CA service resources.
pub mod service;
/// X.509 certificate parsing.
pub mod x509;

pub use ca::{
    sign_request, CaContext, IssuedCertificate, ParamValue, Signer, SigningIntent,
    SigningRequest, SshIntent, SshSigner, X509Intent, X509Signer, DEFAULT_SPIFFE_ROOT,
};
pub use config::{Config, Paths, ServiceEntry};
pub use error::{Error, ErrorCategory, Result};
pub use keys::{encrypt_key_pem, load_ssh_authority, load_x509_authority};
pub use policy::{effective_ttl, parse_duration, ValidityWindow};
pub use render::{render, Rendered, ResponseFormat};
pub use role::{Authorizer, Grant, GrantAuthorizer, Role, SIGN_PRIVILEGE};
pub use secrets::{DirectorySecrets, MemorySecrets, SecretResolver};
pub use service::{CaKind, CaService, CaServiceConfig};
pub use x509::{parse_cert_file, parse_cert_pem, CertInfo};
