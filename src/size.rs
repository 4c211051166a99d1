//! Conversion between human-readable sizes and byte counts.
//!
//! Units stop at terabytes and are powers of 1024. Parsing looks for the first
//! recognised unit character and treats everything in front of it as the
//! number, so `1.5TB` and `1.5T` mean the same thing.

use humansize::{BINARY, format_size as humanize};

use crate::error::SizeError;

const UNITS: [(char, u64); 5] = [
    ('B', 1),
    ('K', 1024),
    ('M', 1024 * 1024),
    ('G', 1024 * 1024 * 1024),
    ('T', 1024 * 1024 * 1024 * 1024),
];

fn unit_factor(c: char) -> Option<u64> {
    UNITS.iter().find(|(unit, _)| *unit == c).map(|(_, f)| *f)
}

/// Parse a size such as `2G`, `100m` or `1048576` into a byte count.
///
/// Fractional results are truncated towards zero.
pub fn parse_size(input: &str) -> Result<u64, SizeError> {
    let upper = input.to_uppercase();

    let Some((idx, factor)) = upper
        .char_indices()
        .find_map(|(i, c)| unit_factor(c).map(|f| (i, f)))
    else {
        // No unit at all, perhaps a plain number
        let value = parse_number(&upper).ok_or_else(|| SizeError::InvalidUnit(upper.clone()))?;
        return scale(value, 1, &upper);
    };

    let number = &upper[..idx];
    let value = parse_number(number).ok_or_else(|| SizeError::InvalidNumber(number.to_string()))?;
    scale(value, factor, &upper)
}

/// Parse an unsigned decimal number, keeping integers exact.
fn parse_number(text: &str) -> Option<Number> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(n) = text.parse::<u64>() {
        return Some(Number::Int(n));
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 => Some(Number::Float(f)),
        _ => None,
    }
}

#[derive(Clone, Copy)]
enum Number {
    Int(u64),
    Float(f64),
}

fn scale(value: Number, factor: u64, input: &str) -> Result<u64, SizeError> {
    let overflow = || SizeError::Overflow(input.to_string());
    match value {
        Number::Int(n) => n.checked_mul(factor).ok_or_else(overflow),
        Number::Float(f) => {
            let bytes = f * factor as f64;
            if bytes >= u64::MAX as f64 {
                Err(overflow())
            } else {
                Ok(bytes as u64)
            }
        }
    }
}

/// Render a byte count the way it is shown to users, e.g. `2 GiB`.
pub fn format_size(bytes: u64) -> String {
    humanize(bytes, BINARY)
}
