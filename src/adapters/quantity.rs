//! Kubernetes resource quantity parsing for requested storage sizes

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;

use crate::error::{Error, Result};

const BINARY_SUFFIXES: [(&str, i32); 6] = [
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
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
    ("", 0),
];

/// Parse a requested storage size such as `10Gi`, `500M` or `1e9`.
///
/// The value must be a well-formed quantity and strictly positive. The
/// returned [`Quantity`] keeps the caller's spelling.
pub fn parse_storage_quantity(raw: &str) -> Result<Quantity> {
    let value = raw.trim();
    if value.is_empty() {
        return Err(Error::validation("storage size must be specified"));
    }

    let bytes = quantity_to_f64(value)
        .ok_or_else(|| Error::validation(format!("Invalid storage quantity '{}'", value)))?;

    if !(bytes.is_finite() && bytes > 0.0) {
        return Err(Error::validation(format!(
            "Storage quantity '{}' must be a finite size greater than zero",
            value
        )));
    }

    Ok(Quantity(value.to_string()))
}

/// Numeric value of a quantity string, `None` if it is malformed
fn quantity_to_f64(value: &str) -> Option<f64> {
    let split = value
        .char_indices()
        .find(|(i, c)| {
            let sign = *i == 0 && (*c == '+' || *c == '-');
            !(c.is_ascii_digit() || *c == '.' || sign)
        })
        .map(|(i, _)| i)
        .unwrap_or(value.len());
    let (number, suffix) = value.split_at(split);

    let digits = number.trim_start_matches(&['+', '-'][..]);
    if digits.is_empty() || digits == "." || digits.matches('.').count() > 1 {
        return None;
    }
    let mantissa: f64 = number.parse().ok()?;

    if let Some((_, power)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some(mantissa * 2f64.powi(*power));
    }
    if let Some((_, power)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Some(mantissa * 10f64.powi(*power));
    }

    let exponent = suffix.strip_prefix(&['e', 'E'][..])?;
    let unsigned = exponent.trim_start_matches(&['+', '-'][..]);
    if unsigned.is_empty() || !unsigned.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let power: i32 = exponent.parse().ok()?;
    Some(mantissa * 10f64.powi(power))
}
