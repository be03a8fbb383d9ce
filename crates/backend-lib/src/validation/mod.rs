// ============================
// crates/backend-lib/src/validation/mod.rs
// ============================
//! Validation of inbound position reports.

use thiserror::Error;

const MAX_LATITUDE: f64 = 90.0;
const MAX_LONGITUDE: f64 = 180.0;
/// Anything faster is a broken GPS fix, not a bus.
const MAX_SPEED_KMH: f64 = 300.0;
const MAX_TOKEN_LENGTH: usize = 4096;

/// Possible validation errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Invalid latitude: {0}")]
    InvalidLatitude(f64),

    #[error("Invalid longitude: {0}")]
    InvalidLongitude(f64),

    #[error("Invalid speed: {0}")]
    InvalidSpeed(f64),

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validate a WGS84 latitude
pub fn validate_latitude(latitude: f64) -> ValidationResult<f64> {
    if !latitude.is_finite() || latitude.abs() > MAX_LATITUDE {
        return Err(ValidationError::InvalidLatitude(latitude));
    }
    Ok(latitude)
}

/// Validate a WGS84 longitude
pub fn validate_longitude(longitude: f64) -> ValidationResult<f64> {
    if !longitude.is_finite() || longitude.abs() > MAX_LONGITUDE {
        return Err(ValidationError::InvalidLongitude(longitude));
    }
    Ok(longitude)
}

/// Validate an optional speed in km/h
pub fn validate_speed(speed: Option<f64>) -> ValidationResult<Option<f64>> {
    match speed {
        Some(s) if !s.is_finite() || s < 0.0 || s > MAX_SPEED_KMH => {
            Err(ValidationError::InvalidSpeed(s))
        },
        other => Ok(other),
    }
}

/// Validate a complete position report
pub fn validate_position(latitude: f64, longitude: f64, speed: Option<f64>) -> ValidationResult<()> {
    validate_latitude(latitude)?;
    validate_longitude(longitude)?;
    validate_speed(speed)?;
    Ok(())
}

/// Cheap shape check run before a token reaches the credential validator
pub fn validate_token_shape(token: &str) -> ValidationResult<&str> {
    if token.trim().is_empty() {
        return Err(ValidationError::InvalidToken(
            "Token must not be empty".to_string(),
        ));
    }

    if token.len() > MAX_TOKEN_LENGTH {
        return Err(ValidationError::InvalidToken(format!(
            "Token must be at most {MAX_TOKEN_LENGTH} characters"
        )));
    }

    Ok(token)
}
