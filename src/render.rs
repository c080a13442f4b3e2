// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Response bodies for issued certificates.

use crate::ca::IssuedCertificate;
use crate::error::Result;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

pub const PEM_CONTENT_TYPE: &str = "application/x-pem-file";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const TEXT_CONTENT_TYPE: &str = "text/plain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum ResponseFormat {
    /// PEM for X.509, the OpenSSH line for SSH
    #[default]
    Pem,
    /// `{"certificate": "..."}`
    Json,
    /// Same as pem; kept for clients that ask for text/plain
    Text,
}

impl ResponseFormat {
    /// Pick a format from an HTTP `Accept` header value.
    pub fn from_accept(accept: Option<&str>) -> Self {
        let Some(accept) = accept else {
            return ResponseFormat::Json;
        };
        let accept = accept.to_ascii_lowercase();
        if accept.contains(PEM_CONTENT_TYPE) {
            ResponseFormat::Pem
        } else if accept.contains(TEXT_CONTENT_TYPE) {
            ResponseFormat::Text
        } else {
            ResponseFormat::Json
        }
    }
}

impl FromStr for ResponseFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pem" => Ok(ResponseFormat::Pem),
            "json" => Ok(ResponseFormat::Json),
            "text" => Ok(ResponseFormat::Text),
            other => Err(format!("unknown response format '{}'", other)),
        }
    }
}

impl fmt::Display for ResponseFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ResponseFormat::Pem => "pem",
            ResponseFormat::Json => "json",
            ResponseFormat::Text => "text",
        })
    }
}

#[derive(Serialize)]
struct CertificateBody<'a> {
    certificate: &'a str,
}

/// A rendered response body with its media type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub content_type: &'static str,
    pub body: String,
}

pub fn render(cert: &IssuedCertificate, format: ResponseFormat) -> Result<Rendered> {
    let text = cert.to_text();
    Ok(match (format, cert) {
        (ResponseFormat::Json, _) => Rendered {
            content_type: JSON_CONTENT_TYPE,
            body: serde_json::to_string(&CertificateBody {
                certificate: &text,
            })?,
        },
        (_, IssuedCertificate::X509 { .. }) => Rendered {
            content_type: PEM_CONTENT_TYPE,
            body: text,
        },
        (_, IssuedCertificate::Ssh { .. }) => Rendered {
            content_type: TEXT_CONTENT_TYPE,
            body: text,
        },
    })
}
