use chrono::NaiveDate;
use thiserror::Error;

/// Programmer-error inputs rejected at stage entry.
///
/// Expected data conditions (small samples, empty tables, oversized models)
/// are never reported through this type; they are carried as result state.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeomediaError {
    #[error("invalid parameter {name} = {value}: {reason}")]
    InvalidParameter {
        name: &'static str,
        value: f64,
        reason: &'static str,
    },

    #[error("invalid time range: start {start} is after end {end}")]
    InvalidTimeRange { start: NaiveDate, end: NaiveDate },

    #[error("malformed input: {0}")]
    MalformedInput(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Reject NaN, infinite and negative threshold values.
pub fn ensure_non_negative(name: &'static str, value: f64) -> Result<(), GeomediaError> {
    if !value.is_finite() {
        return Err(GeomediaError::InvalidParameter {
            name,
            value,
            reason: "must be finite",
        });
    }
    if value < 0.0 {
        return Err(GeomediaError::InvalidParameter {
            name,
            value,
            reason: "must not be negative",
        });
    }
    Ok(())
}
