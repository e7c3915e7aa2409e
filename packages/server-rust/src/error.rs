//! Errors returned by the request-scoped context runtime.

use tenantscope_core::{ConfigError, IsolationError, ValidationError};

/// Write-path failures of the context store and manager.
///
/// Read paths never return these; they log and yield `None`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// A field failed validation. The store is left unchanged.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// A write was attempted outside any context boundary.
    #[error("no active context boundary; wrap the call in RequestContextStore::run")]
    ContextUnavailable,
    /// An update was attempted before any context was set in this boundary.
    #[error("no tenant context has been set in this boundary")]
    NotSet,
    /// Hierarchy or isolation failure surfaced through the manager or service.
    #[error(transparent)]
    Isolation(#[from] IsolationError),
}

impl ContextError {
    /// Name of the offending field for validation failures.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation(err) | Self::Isolation(IsolationError::InvalidId(err)) => {
                Some(err.field.as_str())
            }
            _ => None,
        }
    }
}

/// Failures while assembling a [`crate::TenantScope`] from configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SetupError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("cannot build isolation strategy: {0}")]
    Isolation(#[from] IsolationError),
}
