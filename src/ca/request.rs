// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Raw signing request parameters as received from the caller.

use crate::error::{Error, Result};
use crate::policy::parse_duration;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const CSR_PARAM: &str = "csr";
pub const TTL_PARAM: &str = "ttl";
pub const PUBLIC_KEY_PARAM: &str = "public_key";
pub const PRINCIPALS_PARAM: &str = "principals";

/// A parameter value: form and JSON bodies may carry either shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Single(String),
    Many(Vec<String>),
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Single(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Single(value)
    }
}

impl From<Vec<String>> for ParamValue {
    fn from(values: Vec<String>) -> Self {
        ParamValue::Many(values)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SigningRequest {
    params: BTreeMap<String, ParamValue>,
}

impl SigningRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.params.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.params.get(name)
    }

    /// A required scalar parameter. Blank values count as missing.
    pub fn single(&self, name: &'static str) -> Result<&str> {
        match self.params.get(name) {
            Some(ParamValue::Single(v)) if !v.trim().is_empty() => Ok(v.as_str()),
            Some(ParamValue::Many(_)) => Err(Error::UnexpectedList(name)),
            _ => Err(Error::MissingParameter(name)),
        }
    }

    /// A required list parameter. A scalar becomes a one-element list; list
    /// order is preserved.
    pub fn list(&self, name: &'static str) -> Result<Vec<String>> {
        match self.params.get(name) {
            Some(ParamValue::Single(v)) if v.trim().is_empty() => {
                Err(Error::MissingParameter(name))
            }
            Some(ParamValue::Single(v)) => Ok(vec![v.clone()]),
            Some(ParamValue::Many(values)) => Ok(values.clone()),
            None => Err(Error::MissingParameter(name)),
        }
    }

    /// The requested lifetime.
    pub fn ttl(&self) -> Result<Duration> {
        let raw = self.single(TTL_PARAM)?;
        parse_duration(raw).map_err(|reason| Error::InvalidTtl {
            value: raw.to_string(),
            reason,
        })
    }
}

impl<K, V> FromIterator<(K, V)> for SigningRequest
where
    K: Into<String>,
    V: Into<ParamValue>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            params: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}
