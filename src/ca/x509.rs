// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! X.509 leaf certificates for host identities.

use super::request::{SigningRequest, CSR_PARAM};
use super::{CaContext, IssuedCertificate};
use crate::error::{Error, Result};
use crate::keys;
use crate::policy::{effective_ttl, random_serial, ValidityWindow};
use crate::role::Role;
use crate::service::CaServiceConfig;
use pkcs8::der::{self, asn1::BitString, asn1::OctetString, Any, Encode, Tag, TagNumber};
use rcgen::{
    CertificateParams, CustomExtension, DistinguishedName, DnType, PublicKeyData, SerialNumber,
    SubjectPublicKeyInfo,
};
use sha2::{Digest, Sha256};
use std::time::Duration;
use x509_parser::prelude::{FromDer, X509CertificationRequest};

const CSR_TAGS: &[&str] = &["CERTIFICATE REQUEST", "NEW CERTIFICATE REQUEST"];

const OID_SUBJECT_KEY_IDENTIFIER: &[u64] = &[2, 5, 29, 14];
const OID_KEY_USAGE: &[u64] = &[2, 5, 29, 15];
const OID_SUBJECT_ALT_NAME: &[u64] = &[2, 5, 29, 17];
const OID_BASIC_CONSTRAINTS: &[u64] = &[2, 5, 29, 19];

/// digitalSignature (bit 0), keyEncipherment (2), dataEncipherment (3)
const KEY_USAGE_BITS: u8 = 0b1011_0000;
const KEY_USAGE_UNUSED_BITS: u8 = 4;

/// Validated X.509 signing inputs.
#[derive(Debug, Clone)]
pub struct X509Intent {
    service: String,
    role: Role,
    subject_public_key: Vec<u8>,
    requested_ttl: Duration,
    common_name: String,
    dns_name: String,
    spiffe_id: String,
}

impl X509Intent {
    /// Resource id of the CA service that authorized this intent.
    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn role(&self) -> &Role {
        &self.role
    }

    /// DER `SubjectPublicKeyInfo` taken from the CSR.
    pub fn subject_public_key(&self) -> &[u8] {
        &self.subject_public_key
    }

    pub fn requested_ttl(&self) -> Duration {
        self.requested_ttl
    }

    pub fn common_name(&self) -> &str {
        &self.common_name
    }

    pub fn dns_name(&self) -> &str {
        &self.dns_name
    }

    pub fn spiffe_id(&self) -> &str {
        &self.spiffe_id
    }
}

#[derive(Debug)]
pub struct X509Signer {
    config: CaServiceConfig,
    context: CaContext,
}

impl X509Signer {
    pub fn new(config: CaServiceConfig, context: CaContext) -> Self {
        Self { config, context }
    }

    pub fn config(&self) -> &CaServiceConfig {
        &self.config
    }

    pub async fn prepare_inputs(&self, role: &Role, request: &SigningRequest) -> Result<X509Intent> {
        if !role.is_host() {
            tracing::warn!(role = %role, "X.509 certificate requested by a non-host role");
            return Err(Error::RequestorNotHost);
        }
        self.context.require_sign_privilege(role, &self.config).await?;

        let csr_pem = request.single(CSR_PARAM)?;
        let subject_public_key = verified_csr_public_key(csr_pem).inspect_err(|e| {
            tracing::warn!(role = %role, error = %e, "rejected CSR");
        })?;
        let requested_ttl = request.ttl()?;

        let common_name = format!(
            "{}:{}:{}:{}",
            role.account(),
            self.config.service_id,
            role.kind(),
            role.identifier()
        );
        let dns_name = role
            .identifier()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let spiffe_id = format!(
            "spiffe://{}/{}/{}/{}/{}",
            self.context.spiffe_root,
            role.account(),
            self.config.service_id,
            role.kind(),
            role.identifier()
        );
        check_ia5(&dns_name)?;
        check_ia5(&spiffe_id)?;

        tracing::debug!(role = %role, ttl_secs = requested_ttl.as_secs(), "prepared X.509 intent");
        Ok(X509Intent {
            service: self.config.service.resource_id(),
            role: role.clone(),
            subject_public_key,
            requested_ttl,
            common_name,
            dns_name,
            spiffe_id,
        })
    }

    pub async fn sign(&self, intent: X509Intent) -> Result<IssuedCertificate> {
        super::ensure_same_service(&self.config, &intent.service)?;
        let issuer =
            keys::load_x509_authority(&self.config, self.context.secrets.as_ref()).await?;

        let ttl = effective_ttl(intent.requested_ttl, self.config.max_ttl);
        let window = ValidityWindow::starting_now(ttl)?;
        let (not_before, not_after) = window.to_offset_date_times()?;
        let serial = random_serial();

        let public_key = SubjectPublicKeyInfo::from_der(&intent.subject_public_key)
            .map_err(|e| Error::MalformedCsr(format!("unsupported public key: {}", e)))?;

        let mut params = CertificateParams::default();
        params.distinguished_name = DistinguishedName::new();
        params
            .distinguished_name
            .push(DnType::CommonName, intent.common_name.as_str());
        params.serial_number = Some(SerialNumber::from_slice(&serial));
        params.not_before = not_before;
        params.not_after = not_after;
        params.custom_extensions = leaf_extensions(&intent, public_key.der_bytes())?;

        let cert = params.signed_by(&public_key, &issuer)?;

        tracing::info!(
            service = %self.config.service,
            role = %intent.role,
            serial = %hex_serial(&serial),
            ttl_secs = ttl.as_secs(),
            "issued X.509 certificate"
        );
        Ok(IssuedCertificate::X509 { pem: cert.pem() })
    }
}

/// Leaf extensions, in this order: basicConstraints (CA:FALSE),
/// keyUsage, subjectKeyIdentifier, subjectAltName (one DNS name, one URI).
fn leaf_extensions(intent: &X509Intent, subject_key: &[u8]) -> Result<Vec<CustomExtension>> {
    // cA defaults to FALSE, so DER leaves the sequence empty
    let basic_constraints = Vec::<Any>::new().to_der().map_err(encoding)?;
    let key_usage = BitString::new(KEY_USAGE_UNUSED_BITS, vec![KEY_USAGE_BITS])
        .and_then(|bits| bits.to_der())
        .map_err(encoding)?;
    let key_identifier = OctetString::new(&Sha256::digest(subject_key)[..20])
        .and_then(|id| id.to_der())
        .map_err(encoding)?;
    let subject_alt_name = vec![
        general_name(TagNumber::N2, &intent.dns_name)?,
        general_name(TagNumber::N6, &intent.spiffe_id)?,
    ]
    .to_der()
    .map_err(encoding)?;

    let mut basic_constraints =
        CustomExtension::from_oid_content(OID_BASIC_CONSTRAINTS, basic_constraints);
    basic_constraints.set_criticality(true);
    let mut key_usage = CustomExtension::from_oid_content(OID_KEY_USAGE, key_usage);
    key_usage.set_criticality(true);

    Ok(vec![
        basic_constraints,
        key_usage,
        CustomExtension::from_oid_content(OID_SUBJECT_KEY_IDENTIFIER, key_identifier),
        CustomExtension::from_oid_content(OID_SUBJECT_ALT_NAME, subject_alt_name),
    ])
}

/// `[2] dNSName` or `[6] uniformResourceIdentifier`, both IA5 text.
fn general_name(number: TagNumber, value: &str) -> Result<Any> {
    check_ia5(value)?;
    let tag = Tag::ContextSpecific {
        constructed: false,
        number,
    };
    Any::new(tag, value.as_bytes()).map_err(encoding)
}

fn encoding(e: der::Error) -> Error {
    Error::ExtensionEncoding(e.to_string())
}

/// Parse a PEM CSR, verify its self-signature and return the DER subject
/// public key. Nothing else from the CSR is used.
pub fn verified_csr_public_key(csr_pem: &str) -> Result<Vec<u8>> {
    let pem = ::pem::parse(csr_pem.trim())
        .map_err(|e| Error::MalformedCsr(format!("invalid PEM: {}", e)))?;
    if !CSR_TAGS.contains(&pem.tag()) {
        return Err(Error::MalformedCsr(format!(
            "expected CERTIFICATE REQUEST, got {}",
            pem.tag()
        )));
    }

    let (_, csr) = X509CertificationRequest::from_der(pem.contents())
        .map_err(|e| Error::MalformedCsr(format!("invalid PKCS#10: {}", e)))?;
    csr.verify_signature()
        .map_err(|_| Error::CsrSignatureInvalid)?;

    Ok(csr.certification_request_info.subject_pki.raw.to_vec())
}

fn check_ia5(value: &str) -> Result<()> {
    ia5(value).map(|_| ())
}

fn ia5(value: &str) -> Result<rcgen::string::Ia5String> {
    if value.is_empty() {
        return Err(Error::InvalidIdentity {
            value: value.to_string(),
            reason: "value is empty".into(),
        });
    }
    rcgen::string::Ia5String::try_from(value).map_err(|_| Error::InvalidIdentity {
        value: value.to_string(),
        reason: "only ASCII characters are allowed".into(),
    })
}

fn hex_serial(serial: &[u8]) -> String {
    serial.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{CertificateParams as CsrParams, KeyPair};

    fn csr_pem() -> String {
        let key = KeyPair::generate().unwrap();
        let mut params = CsrParams::new(vec!["ignored.example.com".to_string()]).unwrap();
        params
            .distinguished_name
            .push(DnType::CommonName, "ignored.example.com");
        params.serialize_request(&key).unwrap().pem().unwrap()
    }

    #[test]
    fn test_verified_csr_returns_public_key() {
        let spki = verified_csr_public_key(&csr_pem()).unwrap();
        assert!(SubjectPublicKeyInfo::from_der(&spki).is_ok());
    }

    #[test]
    fn test_malformed_csr() {
        assert!(matches!(
            verified_csr_public_key("not a csr"),
            Err(Error::MalformedCsr(_))
        ));
        let wrong_tag = ::pem::encode(&::pem::Pem::new("CERTIFICATE", vec![0x30, 0x00]));
        assert!(matches!(
            verified_csr_public_key(&wrong_tag),
            Err(Error::MalformedCsr(_))
        ));
    }

    #[test]
    fn test_tampered_csr_fails_signature_check() {
        let pem = ::pem::parse(csr_pem()).unwrap();
        let mut der = pem.contents().to_vec();
        // Last byte belongs to the signature value
        if let Some(last) = der.last_mut() {
            *last ^= 0x01;
        }
        let tampered = ::pem::encode(&::pem::Pem::new("CERTIFICATE REQUEST", der));
        assert!(matches!(
            verified_csr_public_key(&tampered),
            Err(Error::CsrSignatureInvalid)
        ));
    }

    #[test]
    fn test_ia5_rejects_non_ascii() {
        assert!(ia5("web-01").is_ok());
        assert!(matches!(ia5("wéb"), Err(Error::InvalidIdentity { .. })));
        assert!(matches!(ia5(""), Err(Error::InvalidIdentity { .. })));
    }

    #[test]
    fn test_leaf_extensions_order_and_encoding() {
        let intent = X509Intent {
            service: "cucumber:webservice:conjur/kitchen/ca".into(),
            role: Role::parse("cucumber:host:hosts/web-01").unwrap(),
            subject_public_key: Vec::new(),
            requested_ttl: Duration::from_secs(60),
            common_name: "cucumber:kitchen:host:hosts/web-01".into(),
            dns_name: "web-01".into(),
            spiffe_id: "spiffe://conjur/cucumber/kitchen/host/hosts/web-01".into(),
        };
        let exts = leaf_extensions(&intent, b"subject key bits").unwrap();

        let oids: Vec<Vec<u64>> = exts.iter().map(|e| e.oid_components().collect()).collect();
        assert_eq!(
            oids,
            vec![
                OID_BASIC_CONSTRAINTS.to_vec(),
                OID_KEY_USAGE.to_vec(),
                OID_SUBJECT_KEY_IDENTIFIER.to_vec(),
                OID_SUBJECT_ALT_NAME.to_vec(),
            ]
        );
        assert_eq!(exts[0].content(), &[0x30, 0x00]);
        assert!(exts[0].criticality());
        assert_eq!(exts[1].content(), &[0x03, 0x02, 0x04, 0xb0]);
        assert!(exts[1].criticality());
        assert_eq!(&exts[2].content()[..2], &[0x04, 20]);
        assert_eq!(
            &exts[2].content()[2..],
            &Sha256::digest(b"subject key bits")[..20]
        );

        let san = exts[3].content();
        assert_eq!(san[0], 0x30);
        assert_eq!(&san[2..4], &[0x82, 6]);
        assert_eq!(&san[4..10], b"web-01");
        assert_eq!(san[10], 0x86);
    }

    #[test]
    fn test_hex_serial() {
        assert_eq!(hex_serial(&[0x00, 0xab, 0x10]), "00ab10");
    }
}
