// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Loading of authority key material from the secret store.
//!
//! Nothing is cached: every signature resolves, decrypts and parses the key
//! again, and the decrypted bytes are wiped when the returned value drops.

use crate::error::{Error, Result};
use crate::secrets::{secret_id, SecretResolver};
use crate::service::{
    CaServiceConfig, CERTIFICATE_CHAIN_ANNOTATION, PRIVATE_KEY_ANNOTATION,
    PRIVATE_KEY_PASSWORD_ANNOTATION,
};
use pkcs8::{EncryptedPrivateKeyInfo, LineEnding, PrivateKeyInfo};
use rcgen::{Issuer, KeyPair};
use zeroize::Zeroizing;

const ENCRYPTED_PKCS8_TAG: &str = "ENCRYPTED PRIVATE KEY";
const PKCS8_TAG: &str = "PRIVATE KEY";
const CERTIFICATE_TAG: &str = "CERTIFICATE";
const OPENSSH_TAG: &str = "OPENSSH PRIVATE KEY";
const PKCS1_RSA_TAG: &str = "RSA PRIVATE KEY";

/// X.509 authority keys must produce SHA-256 signatures.
fn signs_with_sha256(key_pair: &KeyPair) -> bool {
    let alg = key_pair.algorithm();
    alg == &rcgen::PKCS_RSA_SHA256 || alg == &rcgen::PKCS_ECDSA_P256_SHA256
}

/// An X.509 authority ready to sign: its key and the distinguished name of
/// the first certificate in its chain.
pub type X509Authority = Issuer<'static, KeyPair>;

fn unavailable(slot: &str, reason: impl Into<String>) -> Error {
    Error::KeyMaterialUnavailable {
        slot: slot.to_string(),
        reason: reason.into(),
    }
}

/// Resolve the secret referenced by one of the service's key annotations.
/// Missing annotations and empty secrets are both reported as `None`.
async fn fetch(
    secrets: &dyn SecretResolver,
    config: &CaServiceConfig,
    annotation: &'static str,
    variable: Option<&str>,
) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let Some(variable) = variable else {
        return Ok(None);
    };
    let value = secrets
        .resolve(config.account(), variable)
        .await
        .map_err(|e| match e {
            Error::InvalidSecretName { .. } | Error::KeyMaterialUnavailable { .. } => {
                unavailable(annotation, e.to_string())
            }
            other => other,
        })?;
    Ok(value.filter(|v| !v.is_empty()).map(Zeroizing::new))
}

async fn fetch_required(
    secrets: &dyn SecretResolver,
    config: &CaServiceConfig,
    annotation: &'static str,
    variable: Option<&str>,
) -> Result<Zeroizing<Vec<u8>>> {
    let Some(name) = variable else {
        return Err(unavailable(annotation, "annotation is not set"));
    };
    fetch(secrets, config, annotation, Some(name))
        .await?
        .ok_or_else(|| {
            unavailable(
                annotation,
                format!("secret '{}' has no value", secret_id(config.account(), name)),
            )
        })
}

/// The configured passphrase, if any. A single trailing newline is dropped
/// so that passphrases stored with `echo` work.
async fn fetch_passphrase(
    secrets: &dyn SecretResolver,
    config: &CaServiceConfig,
) -> Result<Option<Zeroizing<Vec<u8>>>> {
    let passphrase = fetch(
        secrets,
        config,
        PRIVATE_KEY_PASSWORD_ANNOTATION,
        config.private_key_password_var.as_deref(),
    )
    .await?;
    Ok(passphrase.and_then(|mut p| {
        if p.last() == Some(&b'\n') {
            p.pop();
            if p.last() == Some(&b'\r') {
                p.pop();
            }
        }
        (!p.is_empty()).then_some(p)
    }))
}

/// Load the X.509 authority for a service: PKCS#8 private key, optionally
/// PBES2-encrypted, and the issuing certificate from the chain secret.
pub async fn load_x509_authority(
    config: &CaServiceConfig,
    secrets: &dyn SecretResolver,
) -> Result<X509Authority> {
    let key_bytes = fetch_required(
        secrets,
        config,
        PRIVATE_KEY_ANNOTATION,
        config.private_key_var.as_deref(),
    )
    .await?;
    let passphrase = fetch_passphrase(secrets, config).await?;
    let chain = fetch_required(
        secrets,
        config,
        CERTIFICATE_CHAIN_ANNOTATION,
        config.certificate_chain_var.as_deref(),
    )
    .await?;

    let key_pem = std::str::from_utf8(&key_bytes)
        .map_err(|_| unavailable(PRIVATE_KEY_ANNOTATION, "private key is not PEM text"))?;
    let key_pem = unlock_pkcs8(key_pem, passphrase.as_ref().map(|p| p.as_slice()))?;
    let key_pair = KeyPair::from_pem(&key_pem)
        .map_err(|e| unavailable(PRIVATE_KEY_ANNOTATION, format!("unusable key: {}", e)))?;
    if !signs_with_sha256(&key_pair) {
        return Err(unavailable(
            PRIVATE_KEY_ANNOTATION,
            format!(
                "authority key algorithm {:?} does not sign with SHA-256",
                key_pair.algorithm()
            ),
        ));
    }

    let issuer_pem = first_certificate(&chain)?;
    Issuer::from_ca_cert_pem(&issuer_pem, key_pair).map_err(|e| {
        unavailable(
            CERTIFICATE_CHAIN_ANNOTATION,
            format!("unusable issuer certificate: {}", e),
        )
    })
}

/// Return an unencrypted PKCS#8 PEM for the authority key.
fn unlock_pkcs8(key_pem: &str, passphrase: Option<&[u8]>) -> Result<Zeroizing<String>> {
    let parsed = pem::parse(key_pem)
        .map_err(|e| unavailable(PRIVATE_KEY_ANNOTATION, format!("invalid PEM: {}", e)))?;

    match (parsed.tag(), passphrase) {
        (ENCRYPTED_PKCS8_TAG, Some(passphrase)) => decrypt_key_pem(key_pem, passphrase),
        (ENCRYPTED_PKCS8_TAG, None) => Err(unavailable(
            PRIVATE_KEY_ANNOTATION,
            "private key is encrypted but no passphrase is configured",
        )),
        (_, Some(_)) => {
            tracing::warn!(
                "passphrase configured for an unencrypted CA private key, ignoring it"
            );
            Ok(Zeroizing::new(key_pem.to_string()))
        }
        (_, None) => Ok(Zeroizing::new(key_pem.to_string())),
    }
}

/// PEM of the first certificate in a chain; the remaining entries describe
/// the path to the root and are not needed for signing.
fn first_certificate(chain: &[u8]) -> Result<String> {
    let entries = pem::parse_many(chain).map_err(|e| {
        unavailable(
            CERTIFICATE_CHAIN_ANNOTATION,
            format!("invalid PEM: {}", e),
        )
    })?;
    entries
        .into_iter()
        .find(|p| p.tag() == CERTIFICATE_TAG)
        .map(|p| pem::encode(&p))
        .ok_or_else(|| {
            unavailable(
                CERTIFICATE_CHAIN_ANNOTATION,
                "chain contains no certificate",
            )
        })
}

/// Load the SSH authority key. OpenSSH private key files are used as is;
/// PEM RSA keys (PKCS#1, PKCS#8 or encrypted PKCS#8) are converted. Either
/// form may be passphrase-protected.
pub async fn load_ssh_authority(
    config: &CaServiceConfig,
    secrets: &dyn SecretResolver,
) -> Result<ssh_key::PrivateKey> {
    let key_bytes = fetch_required(
        secrets,
        config,
        PRIVATE_KEY_ANNOTATION,
        config.private_key_var.as_deref(),
    )
    .await?;
    let passphrase = fetch_passphrase(secrets, config).await?;
    let passphrase = passphrase.as_ref().map(|p| p.as_slice());

    let key_text = std::str::from_utf8(&key_bytes)
        .map_err(|_| unavailable(PRIVATE_KEY_ANNOTATION, "private key is not text"))?;
    if key_text
        .trim_start()
        .starts_with(&format!("-----BEGIN {}-----", OPENSSH_TAG))
    {
        unlock_openssh(key_text, passphrase)
    } else {
        rsa_authority_from_pem(key_text, passphrase)
    }
}

fn unlock_openssh(key_text: &str, passphrase: Option<&[u8]>) -> Result<ssh_key::PrivateKey> {
    let key = ssh_key::PrivateKey::from_openssh(key_text).map_err(|e| {
        unavailable(
            PRIVATE_KEY_ANNOTATION,
            format!("invalid OpenSSH private key: {}", e),
        )
    })?;

    match (key.is_encrypted(), passphrase) {
        (true, Some(passphrase)) => key.decrypt(passphrase).map_err(|_| {
            unavailable(
                PRIVATE_KEY_ANNOTATION,
                "private key passphrase is incorrect",
            )
        }),
        (true, None) => Err(unavailable(
            PRIVATE_KEY_ANNOTATION,
            "private key is encrypted but no passphrase is configured",
        )),
        (false, Some(_)) => {
            tracing::warn!(
                "passphrase configured for an unencrypted CA private key, ignoring it"
            );
            Ok(key)
        }
        (false, None) => Ok(key),
    }
}

fn rsa_authority_from_pem(key_pem: &str, passphrase: Option<&[u8]>) -> Result<ssh_key::PrivateKey> {
    use rsa::pkcs1::DecodeRsaPrivateKey;
    use rsa::pkcs8::DecodePrivateKey;

    fn invalid(e: impl std::fmt::Display) -> Error {
        unavailable(
            PRIVATE_KEY_ANNOTATION,
            format!("invalid RSA private key: {}", e),
        )
    }

    let parsed = pem::parse(key_pem)
        .map_err(|e| unavailable(PRIVATE_KEY_ANNOTATION, format!("invalid PEM: {}", e)))?;
    let rsa_key = match parsed.tag() {
        PKCS1_RSA_TAG => {
            // OpenSSL's legacy Proc-Type/DEK-Info encryption
            if parsed.headers().get("Proc-Type").is_some() {
                return Err(unavailable(
                    PRIVATE_KEY_ANNOTATION,
                    "legacy encrypted PEM keys are not supported, re-encrypt as PKCS#8",
                ));
            }
            if passphrase.is_some() {
                tracing::warn!(
                    "passphrase configured for an unencrypted CA private key, ignoring it"
                );
            }
            rsa::RsaPrivateKey::from_pkcs1_pem(key_pem).map_err(invalid)?
        }
        PKCS8_TAG | ENCRYPTED_PKCS8_TAG => {
            let plain = unlock_pkcs8(key_pem, passphrase)?;
            rsa::RsaPrivateKey::from_pkcs8_pem(&plain).map_err(invalid)?
        }
        other => {
            return Err(unavailable(
                PRIVATE_KEY_ANNOTATION,
                format!("unsupported private key type '{}'", other),
            ))
        }
    };

    let keypair = ssh_key::private::RsaKeypair::try_from(rsa_key).map_err(invalid)?;
    Ok(ssh_key::PrivateKey::from(keypair))
}

/// Encrypt a PKCS#8 PEM private key with a passphrase (PBES2, scrypt +
/// AES-256-CBC).
pub fn encrypt_key_pem(key_pem: &str, password: &str) -> Result<String> {
    use pkcs8::der::Decode;
    use rand::RngCore;

    if password.is_empty() {
        return Err(Error::KeyEncryption("Password cannot be empty".to_string()));
    }

    let pem_obj = pem::parse(key_pem)
        .map_err(|e| Error::KeyEncryption(format!("Failed to parse PEM: {}", e)))?;
    if pem_obj.tag() != PKCS8_TAG {
        return Err(Error::KeyEncryption(format!(
            "Expected a PKCS#8 '{}' block, found '{}'",
            PKCS8_TAG,
            pem_obj.tag()
        )));
    }

    let pki = PrivateKeyInfo::from_der(pem_obj.contents())
        .map_err(|e| Error::KeyEncryption(format!("Failed to parse key: {}", e)))?;

    let mut rng = rand::rng();
    let mut salt = [0u8; 16];
    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let params = pkcs8::pkcs5::pbes2::Parameters::scrypt_aes256cbc(
        pkcs8::pkcs5::scrypt::Params::recommended(),
        &salt,
        &iv,
    )
    .map_err(|e| Error::KeyEncryption(format!("Failed to create encryption params: {}", e)))?;

    let encrypted = pki
        .encrypt_with_params(params, password)
        .map_err(|e| Error::KeyEncryption(format!("Encryption failed: {}", e)))?;

    let pem_str = encrypted
        .to_pem(ENCRYPTED_PKCS8_TAG, LineEnding::LF)
        .map_err(|e| Error::KeyEncryption(format!("Failed to convert to PEM: {}", e)))?;

    Ok(pem_str.to_string())
}

/// Decrypt an `ENCRYPTED PRIVATE KEY` PEM into a plain PKCS#8 PEM.
pub fn decrypt_key_pem(encrypted_pem: &str, passphrase: &[u8]) -> Result<Zeroizing<String>> {
    use pkcs8::der::Decode;

    let pem_obj = pem::parse(encrypted_pem)
        .map_err(|e| unavailable(PRIVATE_KEY_ANNOTATION, format!("invalid PEM: {}", e)))?;

    let encrypted = EncryptedPrivateKeyInfo::from_der(pem_obj.contents()).map_err(|e| {
        unavailable(
            PRIVATE_KEY_ANNOTATION,
            format!("invalid encrypted key: {}", e),
        )
    })?;

    let decrypted = encrypted.decrypt(passphrase).map_err(|_| {
        unavailable(
            PRIVATE_KEY_ANNOTATION,
            "private key passphrase is incorrect",
        )
    })?;

    decrypted.to_pem(PKCS8_TAG, LineEnding::LF).map_err(|e| {
        unavailable(
            PRIVATE_KEY_ANNOTATION,
            format!("decrypted key cannot be encoded: {}", e),
        )
    })
}
