//! Parameter validation utilities
//!
//! Common checks for configuration values with consistent error messages, using the
//! structured errors from [`crate::errors`].

use crate::errors::{DispatchError, Result};
use std::fmt::Display;
use std::time::Duration;

/// Validate that a value is strictly positive.
///
/// # Errors
/// Returns an error if `value` is zero or negative
///
/// # Example
/// ```
/// use proactor_lib::validation::validate_positive;
///
/// assert!(validate_positive(4usize, "buffer-size").is_ok());
/// assert!(validate_positive(0usize, "buffer-size").is_err());
/// ```
pub fn validate_positive<T>(value: T, name: &str) -> Result<()>
where
    T: PartialOrd + Default + Display,
{
    if value <= T::default() {
        return Err(DispatchError::invalid_parameter(
            name,
            format!("must be greater than 0, got {value}"),
        ));
    }
    Ok(())
}

/// Validate that an optional value, when present, is strictly positive.
///
/// # Errors
/// Returns an error if `value` is `Some` and not positive
pub fn validate_optional_positive<T>(value: Option<T>, name: &str) -> Result<()>
where
    T: PartialOrd + Default + Display,
{
    value.map_or(Ok(()), |v| validate_positive(v, name))
}

/// Validate that a duration is non-zero.
///
/// # Errors
/// Returns an error if `value` is zero
pub fn validate_non_zero_duration(value: Duration, name: &str) -> Result<()> {
    if value.is_zero() {
        return Err(DispatchError::invalid_parameter(name, "must be greater than 0"));
    }
    Ok(())
}

/// Validate that a fraction lies within `[0, 1]`.
///
/// # Errors
/// Returns an error if `value` is outside `[0, 1]` or NaN
pub fn validate_fraction(value: f64, name: &str) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        return Err(DispatchError::invalid_parameter(
            name,
            format!("must be between 0 and 1, got {value}"),
        ));
    }
    Ok(())
}
