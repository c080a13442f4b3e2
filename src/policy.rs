// Copyright 2025 Jayashankar
// SPDX-License-Identifier: Apache-2.0

//! Lifetime and serial-number policy shared by both signers.

use crate::error::{Error, Result};
use once_cell::sync::Lazy;
use rand::RngCore;
use regex::Regex;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Size of an X.509 serial number in bytes (160 bits).
pub const SERIAL_BYTES: usize = 20;

const MINUTE: u64 = 60;
const HOUR: u64 = 60 * MINUTE;
const DAY: u64 = 24 * HOUR;

/// ISO 8601 duration without fractional components.
/// Years count as 365 days and months as 30 days.
static ISO8601_DURATION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^P(?:(\d+)Y)?(?:(\d+)M)?(?:(\d+)W)?(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)S)?)?$",
    )
    .expect("invalid duration regex")
});

/// Parse a certificate lifetime.
///
/// Accepts ISO 8601 durations (`PT1H`, `P1DT12H`, `P2W`) or a bare number of
/// seconds. Zero-length lifetimes are rejected.
pub fn parse_duration(input: &str) -> std::result::Result<Duration, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("duration cannot be empty".into());
    }

    let seconds = if input.bytes().all(|b| b.is_ascii_digit()) {
        input
            .parse::<u64>()
            .map_err(|_| "duration is too large".to_string())?
    } else {
        parse_iso8601(&input.to_ascii_uppercase())?
    };

    if seconds == 0 {
        return Err("duration must be greater than zero".into());
    }
    Ok(Duration::from_secs(seconds))
}

fn parse_iso8601(input: &str) -> std::result::Result<u64, String> {
    let caps = ISO8601_DURATION
        .captures(input)
        .ok_or_else(|| "expected an ISO 8601 duration such as PT1H".to_string())?;

    if input == "P" || input.ends_with('T') {
        return Err("ISO 8601 duration has no components".into());
    }

    const UNITS: [u64; 7] = [365 * DAY, 30 * DAY, 7 * DAY, DAY, HOUR, MINUTE, 1];
    let mut total: u64 = 0;
    for (i, unit) in UNITS.iter().enumerate() {
        if let Some(m) = caps.get(i + 1) {
            let value: u64 = m
                .as_str()
                .parse()
                .map_err(|_| "duration is too large".to_string())?;
            total = value
                .checked_mul(*unit)
                .and_then(|secs| total.checked_add(secs))
                .ok_or_else(|| "duration is too large".to_string())?;
        }
    }
    Ok(total)
}

/// The lifetime actually granted: the authority's cap always wins over a
/// larger requested value.
pub fn effective_ttl(requested: Duration, max_ttl: Duration) -> Duration {
    requested.min(max_ttl)
}

/// Whole-second validity window, `not_after - not_before == ttl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidityWindow {
    not_before: u64,
    not_after: u64,
}

impl ValidityWindow {
    pub fn starting_now(ttl: Duration) -> Result<Self> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| Error::InvalidValidity(format!("system clock before epoch: {}", e)))?
            .as_secs();
        Self::starting_at(now, ttl)
    }

    pub fn starting_at(not_before: u64, ttl: Duration) -> Result<Self> {
        let not_after = not_before.checked_add(ttl.as_secs()).ok_or_else(|| {
            Error::InvalidValidity(format!("lifetime of {}s overflows", ttl.as_secs()))
        })?;
        Ok(Self {
            not_before,
            not_after,
        })
    }

    /// Unix timestamp of the first valid second.
    pub fn not_before(&self) -> u64 {
        self.not_before
    }

    /// Unix timestamp at which the certificate stops being valid.
    pub fn not_after(&self) -> u64 {
        self.not_after
    }

    pub fn lifetime(&self) -> Duration {
        Duration::from_secs(self.not_after - self.not_before)
    }

    pub fn to_offset_date_times(&self) -> Result<(time::OffsetDateTime, time::OffsetDateTime)> {
        let convert = |secs: u64| {
            i64::try_from(secs)
                .ok()
                .and_then(|s| time::OffsetDateTime::from_unix_timestamp(s).ok())
                .ok_or_else(|| Error::InvalidValidity(format!("timestamp {} out of range", secs)))
        };
        Ok((convert(self.not_before)?, convert(self.not_after)?))
    }
}

/// Uniformly random 160-bit serial, big-endian. Encoders treat it as a
/// non-negative integer.
pub fn random_serial() -> [u8; SERIAL_BYTES] {
    let mut serial = [0u8; SERIAL_BYTES];
    rand::rng().fill_bytes(&mut serial);
    serial
}

/// Random serial for OpenSSH certificates, whose wire format holds a uint64.
pub fn random_ssh_serial() -> u64 {
    rand::rng().next_u64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_parse_seconds() {
        assert_eq!(parse_duration("3600").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration(" 7200 ").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_iso8601() {
        assert_eq!(parse_duration("PT1H").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("PT5M").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("PT30S").unwrap(), Duration::from_secs(30));
        assert_eq!(parse_duration("P1D").unwrap(), Duration::from_secs(86400));
        assert_eq!(
            parse_duration("P1DT2H30M").unwrap(),
            Duration::from_secs(86400 + 2 * 3600 + 30 * 60)
        );
        assert_eq!(parse_duration("P2W").unwrap(), Duration::from_secs(14 * 86400));
        assert_eq!(parse_duration("pt2h").unwrap(), Duration::from_secs(7200));
    }

    #[test]
    fn test_parse_month_vs_minute() {
        assert_eq!(parse_duration("P1M").unwrap(), Duration::from_secs(30 * 86400));
        assert_eq!(parse_duration("PT1M").unwrap(), Duration::from_secs(60));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("P").is_err());
        assert!(parse_duration("PT").is_err());
        assert!(parse_duration("1h").is_err());
        assert!(parse_duration("PT1.5H").is_err());
        assert!(parse_duration("-60").is_err());
        assert!(parse_duration("P1H").is_err());
        assert!(parse_duration("forever").is_err());
    }

    #[test]
    fn test_parse_rejects_zero() {
        assert!(parse_duration("0").is_err());
        assert!(parse_duration("PT0S").is_err());
    }

    #[test]
    fn test_parse_rejects_overflow() {
        assert!(parse_duration("99999999999999999999").is_err());
        assert!(parse_duration("P99999999999999999Y").is_err());
    }

    #[test]
    fn test_effective_ttl_caps_at_max() {
        let max = Duration::from_secs(3600);
        assert_eq!(effective_ttl(Duration::from_secs(7200), max), max);
        assert_eq!(
            effective_ttl(Duration::from_secs(600), max),
            Duration::from_secs(600)
        );
        assert_eq!(effective_ttl(max, max), max);
    }

    #[test]
    fn test_validity_window_lifetime_is_exact() {
        let window = ValidityWindow::starting_at(1_700_000_000, Duration::from_secs(3600)).unwrap();
        assert_eq!(window.not_before(), 1_700_000_000);
        assert_eq!(window.not_after(), 1_700_003_600);
        assert_eq!(window.lifetime(), Duration::from_secs(3600));

        let (nb, na) = window.to_offset_date_times().unwrap();
        assert_eq!((na - nb).whole_seconds(), 3600);
    }

    #[test]
    fn test_validity_window_overflow() {
        assert!(ValidityWindow::starting_at(u64::MAX, Duration::from_secs(1)).is_err());
    }

    #[test]
    fn test_random_serials_do_not_collide() {
        let serials: HashSet<[u8; SERIAL_BYTES]> = (0..1000).map(|_| random_serial()).collect();
        assert_eq!(serials.len(), 1000);
    }

    #[test]
    fn test_random_serials_use_high_bits() {
        // Over many draws the top byte must take on large values too.
        let max_top = (0..1000).map(|_| random_serial()[0]).max().unwrap();
        assert!(max_top >= 0x80);
    }
}
