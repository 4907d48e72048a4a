//! Validation helpers for event rows.
//!
//! These mirror the `event` column constraints. Configuration uses them to
//! reject a bad name up front; the in-memory engine uses them to fail an
//! execute the way the server would.

use crate::error::{ModelError, ValidationError};
use crate::model::{EventRow, MAX_NAME_CHARS};

/// Validates event rows against the table's column constraints.
pub struct EventValidator;

impl EventValidator {
    /// Validate a row and return all validation errors found.
    ///
    /// # Errors
    ///
    /// Returns a `Vec<ValidationError>` if any column constraint is violated.
    pub fn validate(row: &EventRow) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        // varchar(255) counts characters, not bytes.
        if row.name.chars().count() > MAX_NAME_CHARS {
            errors.push(ValidationError::new(
                "name",
                format!("exceeds {MAX_NAME_CHARS} characters"),
            ));
        }
        // PostgreSQL text cannot store NUL.
        if row.name.contains('\0') {
            errors.push(ValidationError::new("name", "cannot contain NUL"));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Validate a row, collapsing the errors into a [`ModelError`].
    ///
    /// # Errors
    ///
    /// Returns `ModelError::Validation` or `ModelError::ValidationErrors`.
    pub fn check(row: &EventRow) -> crate::Result<()> {
        Self::validate(row).map_err(ModelError::from_validation_errors)
    }
}
