//! Reads hierarchy identifiers from inbound request headers.
//!
//! Each identifier is looked up under several spellings, first match wins:
//! `x-{name}-id`, `x_{name}_id`, `{name}-id`, `{name}_id`, `{name}id`.
//! Lookups are case-insensitive; blank values count as absent.

use std::collections::HashMap;
use std::sync::Arc;

use tenantscope_core::hierarchy::determine_isolation_level;
use tenantscope_core::{ClockSource, IsolationError, MultiLevelContext, TenantContext};
use tracing::debug;

/// Case-insensitive header lookup.
pub trait HeaderSource {
    /// Trimmed value of `name`, or `None` when missing, blank, or not UTF-8.
    fn header(&self, name: &str) -> Option<String>;
}

impl HeaderSource for http::HeaderMap {
    fn header(&self, name: &str) -> Option<String> {
        self.get(name.to_ascii_lowercase().as_str())
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    }
}

impl HeaderSource for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<String> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.trim())
            .filter(|value| !value.is_empty())
            .map(str::to_owned)
    }
}

// ---------------------------------------------------------------------------
// ContextExtractor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ContextExtractor {
    clock: Arc<dyn ClockSource>,
}

impl ContextExtractor {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self { clock }
    }

    /// Builds a context from `headers`.
    ///
    /// Returns `Ok(None)` when no tenant id is present. A missing request id
    /// is replaced by a fresh v4 UUID. Ids are not validated here; the
    /// context manager does that when the context is written.
    ///
    /// # Errors
    ///
    /// [`IsolationError::HierarchyViolation`] when a deeper id is present
    /// without one of its ancestors.
    pub fn extract<S: HeaderSource + ?Sized>(
        &self,
        headers: &S,
    ) -> Result<Option<MultiLevelContext>, IsolationError> {
        let Some(tenant_id) = lookup(headers, "tenant") else {
            debug!("no tenant id in request headers");
            return Ok(None);
        };
        let organization_id = lookup(headers, "organization");
        let department_id = lookup(headers, "department");
        let user_id = lookup(headers, "user");

        let level = determine_isolation_level(
            &tenant_id,
            organization_id.as_deref(),
            department_id.as_deref(),
            user_id.as_deref(),
        )?;

        let request_id = lookup(headers, "request").unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let mut base = TenantContext::new(tenant_id, self.clock.now()).with_request_id(request_id);
        base.user_id = user_id;
        base.session_id = lookup(headers, "session");

        Ok(Some(MultiLevelContext {
            base,
            organization_id,
            department_id,
            isolation_level: level,
        }))
    }
}

fn lookup<S: HeaderSource + ?Sized>(headers: &S, name: &str) -> Option<String> {
    [
        format!("x-{name}-id"),
        format!("x_{name}_id"),
        format!("{name}-id"),
        format!("{name}_id"),
        format!("{name}id"),
    ]
    .iter()
    .find_map(|candidate| headers.header(candidate))
}
