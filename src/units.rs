//! Quantity and duration helpers
//!
//! Kubernetes quantities ("10Gi", "500M", "1.5Ti", "1e9") are converted to
//! whole bytes the way the API server does: fractional results round up.
//! Binary suffixes are powers of 1024, decimal suffixes powers of 1000.

use crate::error::{Error, Result};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use std::collections::BTreeMap;
use std::time::Duration;

/// Storage resource key inside request/capacity maps
pub const STORAGE_RESOURCE: &str = "storage";

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];

const DECIMAL_SUFFIXES: [(&str, i32); 10] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("", 0),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Parse a Kubernetes quantity string into bytes
pub fn parse_quantity(s: &str) -> Result<i64> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::CapacityParse("empty quantity".into()));
    }

    let (negative, unsigned) = match s.as_bytes()[0] {
        b'-' => (true, &s[1..]),
        b'+' => (false, &s[1..]),
        _ => (false, s),
    };

    let num_end = unsigned
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(unsigned.len());
    let (num_str, suffix) = unsigned.split_at(num_end);

    let (int_part, frac_part) = match num_str.split_once('.') {
        Some((i, f)) => (i, f),
        None => (num_str, ""),
    };
    if (int_part.is_empty() && frac_part.is_empty()) || frac_part.contains('.') {
        return Err(Error::CapacityParse(format!("invalid number in {:?}", s)));
    }

    let mut numerator: i128 = 0;
    for digit in int_part.bytes().chain(frac_part.bytes()) {
        numerator = numerator
            .checked_mul(10)
            .and_then(|n| n.checked_add(i128::from(digit - b'0')))
            .ok_or_else(|| Error::CapacityParse(format!("quantity {:?} overflows", s)))?;
    }
    let mut denominator: i128 = pow10(frac_part.len() as u32)
        .ok_or_else(|| Error::CapacityParse(format!("too many fractional digits in {:?}", s)))?;

    let overflow = || Error::CapacityParse(format!("quantity {:?} overflows", s));

    if let Some(&(_, shift)) = BINARY_SUFFIXES.iter().find(|(name, _)| *name == suffix) {
        numerator = numerator.checked_mul(1i128 << shift).ok_or_else(overflow)?;
    } else {
        let exponent = match DECIMAL_SUFFIXES.iter().find(|(name, _)| *name == suffix) {
            Some(&(_, exp)) => exp,
            None => parse_exponent(suffix)
                .ok_or_else(|| {
                    Error::CapacityParse(format!("unknown suffix {:?} in {:?}", suffix, s))
                })?,
        };
        let scale = pow10(exponent.unsigned_abs()).ok_or_else(overflow)?;
        if exponent >= 0 {
            numerator = numerator.checked_mul(scale).ok_or_else(overflow)?;
        } else {
            denominator = denominator.checked_mul(scale).ok_or_else(overflow)?;
        }
    }

    // Round up to a whole byte
    let mut bytes = numerator / denominator;
    if numerator % denominator != 0 {
        bytes += 1;
    }
    if negative {
        bytes = -bytes;
    }

    i64::try_from(bytes).map_err(|_| overflow())
}

fn parse_exponent(suffix: &str) -> Option<i32> {
    let rest = suffix.strip_prefix('e').or_else(|| suffix.strip_prefix('E'))?;
    if rest.is_empty() {
        return None;
    }
    rest.parse().ok()
}

fn pow10(exp: u32) -> Option<i128> {
    10i128.checked_pow(exp)
}

/// Storage entry of a resource map in bytes; absent counts as zero
pub fn storage_bytes(resources: Option<&BTreeMap<String, Quantity>>) -> Result<i64> {
    match resources.and_then(|r| r.get(STORAGE_RESOURCE)) {
        Some(quantity) => parse_quantity(&quantity.0),
        None => Ok(0),
    }
}

/// Format bytes with the largest binary suffix that divides them exactly
pub fn format_quantity(bytes: i64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    let magnitude = bytes.unsigned_abs();
    let sign = if bytes < 0 { "-" } else { "" };
    for (name, shift) in BINARY_SUFFIXES.iter().rev() {
        let unit = 1u64 << shift;
        if magnitude % unit == 0 {
            return format!("{}{}{}", sign, magnitude / unit, name);
        }
    }
    bytes.to_string()
}

/// Parse a duration such as "1h", "30m", "10s", "500ms" or "1h30m".
///
/// A bare number is taken as seconds.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s.is_empty() {
        return Err(Error::DurationParse("empty duration".into()));
    }
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let num_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if num_end == 0 {
            return Err(Error::DurationParse(format!("expected number in {:?}", s)));
        }
        let value: f64 = rest[..num_end]
            .parse()
            .map_err(|_| Error::DurationParse(format!("invalid number in {:?}", s)))?;
        rest = &rest[num_end..];

        let unit_end = rest
            .find(|c: char| c.is_ascii_digit() || c == '.')
            .unwrap_or(rest.len());
        let seconds_per_unit = match &rest[..unit_end] {
            "ms" => 0.001,
            "s" => 1.0,
            "m" => 60.0,
            "h" => 3600.0,
            "" => return Err(Error::DurationParse(format!("missing unit in {:?}", s))),
            unit => {
                return Err(Error::DurationParse(format!(
                    "unknown unit {:?} in {:?}",
                    unit, s
                )))
            }
        };
        rest = &rest[unit_end..];

        let part = Duration::try_from_secs_f64(value * seconds_per_unit)
            .map_err(|_| Error::DurationParse(format!("duration {:?} is out of range", s)))?;
        total = total
            .checked_add(part)
            .ok_or_else(|| Error::DurationParse(format!("duration {:?} is out of range", s)))?;
    }

    Ok(total)
}
