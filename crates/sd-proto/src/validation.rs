//! Field validation for frames that carry user input.

use crate::signaling::Credentials;

/// Maximum accepted length of a host id.
pub const MAX_HOST_ID_LEN: usize = 128;

/// Maximum accepted length of a password.
pub const MAX_PASSWORD_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("required field '{field}' is empty")]
    EmptyField { field: &'static str },
    #[error("field '{field}' is {actual} bytes, limit is {max}")]
    TooLong { field: &'static str, max: usize, actual: usize },
}

impl Credentials {
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_len("hostId", self.host_id.as_str(), MAX_HOST_ID_LEN)?;
        check_len("password", &self.password, MAX_PASSWORD_LEN)
    }
}

fn check_len(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::EmptyField { field });
    }
    if value.len() > max {
        return Err(ValidationError::TooLong { field, max, actual: value.len() });
    }
    Ok(())
}
