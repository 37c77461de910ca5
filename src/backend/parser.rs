//! Range request parser.
//!
//! A request is a single line `min,max,cols` of decimal digits. Checks run in
//! a fixed order and stop at the first failure, so every malformed input maps
//! to exactly one error string.

use serde::Deserialize;
use std::fmt;

/// A validated request for `cols` columns of the integers `min..=max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeRequest {
    pub min: u64,
    pub max: u64,
    pub cols: u64,
}

impl fmt::Display for RangeRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.min, self.max, self.cols)
    }
}

/// Upper bounds applied after the digits check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Largest value accepted for any of the three fields.
    pub max_value: u64,
    /// Largest sequence length, `max - min + 1`.
    pub max_span: u64,
    /// Largest column count.
    pub max_cols: u64,
}

impl Limits {
    /// Longest reply a request within these limits can produce: one number
    /// of at most `max_value`'s width plus one separator per value.
    pub fn max_reply_len(&self) -> u64 {
        let width = self.max_value.to_string().len() as u64 + 1;
        self.max_span.saturating_mul(width)
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_value: 1_000_000_000,
            max_span: 10_000,
            max_cols: 10_000,
        }
    }
}

/// Why a request was rejected. `Display` is the exact reply sent to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("No data received")]
    Empty,
    #[error("Data not in correct format no comma")]
    NoComma,
    #[error("Data not in correct format not 3 values")]
    FieldCount,
    #[error("Data not in correct format not digits")]
    NotDigits,
    #[error("Data not in correct format value too large")]
    ValueTooLarge,
    #[error("Data not in correct format min > max")]
    MinAboveMax,
    #[error("Data not in correct format cols < 1")]
    NoColumns,
    #[error("Data not in correct format range too large")]
    SpanTooLarge,
    #[error("Data not in correct format cols too large")]
    TooManyColumns,
}

/// Parse and validate one request line.
pub fn parse(input: &str, limits: &Limits) -> Result<RangeRequest, ValidationError> {
    let data = input.trim();

    if data.is_empty() {
        return Err(ValidationError::Empty);
    }
    if !data.contains(',') {
        return Err(ValidationError::NoComma);
    }

    let fields: Vec<&str> = data.split(',').collect();
    let [min, max, cols] = fields[..] else {
        return Err(ValidationError::FieldCount);
    };

    if !(is_digits(min) && is_digits(max) && is_digits(cols)) {
        return Err(ValidationError::NotDigits);
    }

    let min = parse_bounded(min, limits)?;
    let max = parse_bounded(max, limits)?;
    let cols = parse_bounded(cols, limits)?;

    if min > max {
        return Err(ValidationError::MinAboveMax);
    }
    if cols < 1 {
        return Err(ValidationError::NoColumns);
    }
    if (max - min).saturating_add(1) > limits.max_span {
        return Err(ValidationError::SpanTooLarge);
    }
    if cols > limits.max_cols {
        return Err(ValidationError::TooManyColumns);
    }

    Ok(RangeRequest { min, max, cols })
}

fn is_digits(field: &str) -> bool {
    !field.is_empty() && field.bytes().all(|b| b.is_ascii_digit())
}

/// Digit strings too long for `u64` count as too large.
fn parse_bounded(field: &str, limits: &Limits) -> Result<u64, ValidationError> {
    field
        .parse::<u64>()
        .ok()
        .filter(|value| *value <= limits.max_value)
        .ok_or(ValidationError::ValueTooLarge)
}
