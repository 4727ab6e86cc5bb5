//! Request validation utilities.

use crate::types::Result;

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> Result<()> {
    if s.is_empty() {
        return Err(crate::types::Error::invalid_argument(format!(
            "{} cannot be empty",
            field
        )));
    }
    Ok(())
}
