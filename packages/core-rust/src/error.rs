//! Error types for context validation, isolation and configuration.

use crate::context::IsolationLevel;

/// A context field failed validation on a write path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// Name of the offending field (`tenantId`, `custom:<key>`, ...).
    pub field: String,
    /// Human-readable description of the violated rule.
    pub reason: String,
}

impl ValidationError {
    #[must_use]
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised while deriving keys or isolating/extracting data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IsolationError {
    /// A single-level envelope belongs to a different tenant.
    #[error("isolation mismatch: expected tenant {expected}, envelope carries {found:?}")]
    IsolationMismatch {
        expected: String,
        found: Option<String>,
    },
    /// A multi-level envelope field disagrees with the caller's context.
    #[error("context mismatch on {field}: envelope carries {stored}, caller has {caller:?}")]
    ContextMismatch {
        field: &'static str,
        stored: String,
        caller: Option<String>,
    },
    /// The derived key exceeds the configured maximum; keys are never truncated.
    #[error("isolation key is {length} bytes, maximum is {max}")]
    KeyTooLong { length: usize, max: usize },
    /// The configured strategy has no implementation.
    #[error("unsupported isolation strategy: {0}")]
    UnsupportedStrategy(String),
    /// The tenant/organization/department/user chain is broken.
    #[error("hierarchy violation at {level}: {reason}")]
    HierarchyViolation {
        level: IsolationLevel,
        reason: String,
    },
    /// A hierarchy id that would be embedded in a key is malformed.
    #[error(transparent)]
    InvalidId(#[from] ValidationError),
    /// The value handed to an extract call is not an isolation envelope.
    #[error("invalid envelope: {0}")]
    InvalidEnvelope(String),
}

impl IsolationError {
    pub(crate) fn hierarchy(level: IsolationLevel, reason: impl Into<String>) -> Self {
        Self::HierarchyViolation {
            level,
            reason: reason.into(),
        }
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("unknown isolation strategy: {0}")]
    UnknownStrategy(String),
    #[error("invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_display_names_field() {
        let err = ValidationError::new("tenantId", "must be at least 3 characters");
        assert_eq!(
            err.to_string(),
            "invalid tenantId: must be at least 3 characters"
        );
    }

    #[test]
    fn key_too_long_display() {
        let err = IsolationError::KeyTooLong {
            length: 300,
            max: 250,
        };
        assert_eq!(err.to_string(), "isolation key is 300 bytes, maximum is 250");
    }

    #[test]
    fn hierarchy_violation_display_uses_level_name() {
        let err = IsolationError::hierarchy(IsolationLevel::Department, "organization missing");
        assert_eq!(
            err.to_string(),
            "hierarchy violation at department: organization missing"
        );
    }
}
