// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Parse X.509 certificates without shelling out to openssl.

use crate::error::{Error, Result};
use std::path::Path;
use x509_parser::prelude::*;

#[derive(Debug, Clone)]
pub struct CertInfo {
    pub not_after_timestamp: i64,
    pub not_before_timestamp: i64,
    pub common_name: Option<String>,
    pub issuer_common_name: Option<String>,
    /// Lowercase hex, as stored (may carry a leading zero byte)
    pub serial_hex: String,
    pub dns_names: Vec<String>,
    pub uris: Vec<String>,
    pub is_ca: bool,
    pub key_usages: Vec<&'static str>,
}

impl CertInfo {
    pub fn expiry_string(&self) -> String {
        format_timestamp(self.not_after_timestamp)
    }

    pub fn lifetime_secs(&self) -> i64 {
        self.not_after_timestamp - self.not_before_timestamp
    }

    pub fn is_expired(&self) -> bool {
        ::time::OffsetDateTime::now_utc().unix_timestamp() >= self.not_after_timestamp
    }
}

/// `YYYY-MM-DD HH:MM:SS UTC`
pub fn format_timestamp(ts: i64) -> String {
    match ::time::OffsetDateTime::from_unix_timestamp(ts) {
        Ok(dt) => format!(
            "{}-{:02}-{:02} {:02}:{:02}:{:02} UTC",
            dt.year(),
            dt.month() as u8,
            dt.day(),
            dt.hour(),
            dt.minute(),
            dt.second()
        ),
        Err(_) => "Invalid date".to_string(),
    }
}

pub fn parse_cert_file(path: &Path) -> Result<CertInfo> {
    let pem_data = std::fs::read_to_string(path).map_err(|e| Error::ReadFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_cert_pem(&pem_data)
}

pub fn parse_cert_pem(pem_str: &str) -> Result<CertInfo> {
    let pem = ::pem::parse(pem_str)
        .map_err(|e| Error::CertParse(format!("Failed to parse PEM: {}", e)))?;

    if pem.tag() != "CERTIFICATE" {
        return Err(Error::CertParse(format!(
            "Expected CERTIFICATE, got {}",
            pem.tag()
        )));
    }

    let (_, cert) = X509Certificate::from_der(pem.contents())
        .map_err(|e| Error::CertParse(format!("Invalid X.509: {}", e)))?;

    let first_cn = |name: &X509Name| {
        name.iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(String::from)
    };

    let mut dns_names = Vec::new();
    let mut uris = Vec::new();
    let mut is_ca = false;
    let mut key_usages = Vec::new();

    for ext in cert.extensions() {
        match ext.parsed_extension() {
            ParsedExtension::SubjectAlternativeName(san) => {
                for name in &san.general_names {
                    match name {
                        GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                        GeneralName::URI(uri) => uris.push(uri.to_string()),
                        _ => {}
                    }
                }
            }
            ParsedExtension::BasicConstraints(bc) => {
                is_ca = bc.ca;
            }
            ParsedExtension::KeyUsage(ku) => {
                let flags = [
                    (ku.digital_signature(), "digitalSignature"),
                    (ku.non_repudiation(), "nonRepudiation"),
                    (ku.key_encipherment(), "keyEncipherment"),
                    (ku.data_encipherment(), "dataEncipherment"),
                    (ku.key_agreement(), "keyAgreement"),
                    (ku.key_cert_sign(), "keyCertSign"),
                    (ku.crl_sign(), "cRLSign"),
                ];
                key_usages.extend(flags.iter().filter(|(set, _)| *set).map(|(_, n)| *n));
            }
            _ => {}
        }
    }

    Ok(CertInfo {
        not_after_timestamp: cert.validity().not_after.timestamp(),
        not_before_timestamp: cert.validity().not_before.timestamp(),
        common_name: first_cn(cert.subject()),
        issuer_common_name: first_cn(cert.issuer()),
        serial_hex: cert
            .tbs_certificate
            .raw_serial()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect(),
        dns_names,
        uris,
        is_ca,
        key_usages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rcgen::{BasicConstraints, CertificateParams, DnType, IsCa, KeyPair, KeyUsagePurpose};

    #[test]
    fn test_parse_leaf_cert() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::new(vec!["web-01".to_string()]).unwrap();
        params.distinguished_name.push(DnType::CommonName, "web-01");
        params.is_ca = IsCa::ExplicitNoCa;
        params.key_usages = vec![KeyUsagePurpose::DigitalSignature];
        let now = ::time::OffsetDateTime::now_utc();
        params.not_before = now;
        params.not_after = now + ::time::Duration::hours(1);
        let cert = params.self_signed(&key).unwrap();

        let info = parse_cert_pem(&cert.pem()).unwrap();
        assert_eq!(info.common_name.as_deref(), Some("web-01"));
        assert_eq!(info.dns_names, vec!["web-01".to_string()]);
        assert!(!info.is_ca);
        assert_eq!(info.key_usages, vec!["digitalSignature"]);
        assert!((3599..=3600).contains(&info.lifetime_secs()));
        assert!(!info.is_expired());
    }

    #[test]
    fn test_parse_ca_cert() {
        let info = parse_cert_pem(include_str!("../tests/fixtures/x509_ca_rsa.crt")).unwrap();
        assert!(info.is_ca);
        assert_eq!(info.common_name.as_deref(), Some("Test Intermediate CA"));
    }

    #[test]
    fn test_rejects_non_certificate_pem() {
        let err = parse_cert_pem(include_str!("../tests/fixtures/x509_ca_rsa.key")).unwrap_err();
        assert!(matches!(err, Error::CertParse(_)));
    }

    #[test]
    fn test_format_timestamp() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
    }

    #[test]
    fn test_parse_self_signed_ca_flag() {
        let key = KeyPair::generate().unwrap();
        let mut params = CertificateParams::default();
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        let cert = params.self_signed(&key).unwrap();
        assert!(parse_cert_pem(&cert.pem()).unwrap().is_ca);
    }
}
