//! Validation issue types.

use serde::{Deserialize, Serialize};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Informational only.
    Info,
    /// Suspicious but not fatal.
    Warning,
    /// The record violates an invariant.
    Error,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A validation issue attached to an entity.
///
/// Issues never abort extraction on their own; they accumulate in the
/// final result (and may fail the run at the end when
/// `fail_on_validation_errors` is configured).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// URN of the entity with the issue.
    pub entity_id: String,
    /// Field that failed validation.
    pub field: String,
    /// Human-readable message.
    pub message: String,
    /// Issue severity.
    pub severity: Severity,
}

impl ValidationIssue {
    /// Creates an error-severity issue.
    #[must_use]
    pub fn error(entity_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Error,
        }
    }

    /// Creates a warning-severity issue.
    #[must_use]
    pub fn warning(entity_id: &str, field: &str, message: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            message: message.into(),
            severity: Severity::Warning,
        }
    }
}
