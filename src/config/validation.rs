//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (rotation limits not negative)
//! - Reject bind settings that can never work
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use crate::config::schema::AppConfig;

/// A single semantic problem found in a configuration snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    /// Dotted field path (e.g., `http.host`).
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Check a snapshot for semantic errors.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.http.host.trim().is_empty() {
        errors.push(ValidationError::new("http.host", "must not be empty"));
    }

    let limits = [
        ("log.max_size_mb", config.log.max_size_mb),
        ("log.max_backups", config.log.max_backups),
        ("log.max_age_days", config.log.max_age_days),
    ];
    for (field, value) in limits {
        if value < 0 {
            errors.push(ValidationError::new(
                field,
                format!("must not be negative (got {value})"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
