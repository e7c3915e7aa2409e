//! Tenant and multi-level context types carried through a request.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::ids;

/// Depth of the tenancy hierarchy a context is scoped to.
///
/// Ordering follows the hierarchy: `Tenant < Organization < Department < User`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolationLevel {
    #[default]
    Tenant,
    Organization,
    Department,
    User,
}

impl IsolationLevel {
    /// All levels, shallowest first.
    pub const ALL: [IsolationLevel; 4] = [
        IsolationLevel::Tenant,
        IsolationLevel::Organization,
        IsolationLevel::Department,
        IsolationLevel::User,
    ];

    /// Lowercase name, as used in configuration and envelopes.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Organization => "organization",
            Self::Department => "department",
            Self::User => "user",
        }
    }

    /// Short segment label used inside derived keys.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Tenant => "tenant",
            Self::Organization => "org",
            Self::Department => "dept",
            Self::User => "user",
        }
    }

    /// Name of the context field holding this level's id.
    #[must_use]
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Tenant => "tenantId",
            Self::Organization => "organizationId",
            Self::Department => "departmentId",
            Self::User => "userId",
        }
    }

    /// Position in the hierarchy, 0 for tenant.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IsolationLevel {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tenant" => Ok(Self::Tenant),
            "organization" | "org" => Ok(Self::Organization),
            "department" | "dept" => Ok(Self::Department),
            "user" => Ok(Self::User),
            other => Err(ValidationError::new(
                "isolationLevel",
                format!("unknown isolation level '{other}'"),
            )),
        }
    }
}

/// Identity of the tenant (and optionally user/request/session) a request runs for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantContext {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    /// When the context was established. Drives `context_timeout` expiry.
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl TenantContext {
    /// Creates a context for `tenant_id` stamped with `timestamp`.
    pub fn new(tenant_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_id: None,
            request_id: None,
            session_id: None,
            timestamp,
            metadata: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Checks every present field against the id rules.
    ///
    /// # Errors
    ///
    /// Returns the first [`ValidationError`] found, in field declaration order.
    pub fn validate(&self) -> Result<(), ValidationError> {
        ids::validate_id("tenantId", &self.tenant_id)?;
        if let Some(user_id) = &self.user_id {
            ids::validate_id("userId", user_id)?;
        }
        if let Some(request_id) = &self.request_id {
            ids::validate_token("requestId", request_id)?;
        }
        if let Some(session_id) = &self.session_id {
            ids::validate_token("sessionId", session_id)?;
        }
        for key in self.metadata.keys() {
            ids::validate_custom_key(key)?;
        }
        Ok(())
    }

    /// Returns `true` once `now` is past `timestamp + timeout`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        match chrono::Duration::from_std(timeout) {
            Ok(timeout) => now > self.timestamp + timeout,
            // A timeout too large to represent never expires.
            Err(_) => false,
        }
    }
}

/// A [`TenantContext`] extended with organization and department scope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiLevelContext {
    #[serde(flatten)]
    pub base: TenantContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub organization_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department_id: Option<String>,
    #[serde(default)]
    pub isolation_level: IsolationLevel,
}

impl MultiLevelContext {
    /// Creates a tenant-level context.
    pub fn new(tenant_id: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self::from_tenant(TenantContext::new(tenant_id, timestamp))
    }

    /// Lifts a plain tenant context to a multi-level one at tenant scope.
    #[must_use]
    pub fn from_tenant(base: TenantContext) -> Self {
        Self {
            base,
            organization_id: None,
            department_id: None,
            isolation_level: IsolationLevel::Tenant,
        }
    }

    #[must_use]
    pub fn with_organization(mut self, organization_id: impl Into<String>) -> Self {
        self.organization_id = Some(organization_id.into());
        self
    }

    #[must_use]
    pub fn with_department(mut self, department_id: impl Into<String>) -> Self {
        self.department_id = Some(department_id.into());
        self
    }

    #[must_use]
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.base.user_id = Some(user_id.into());
        self
    }

    #[must_use]
    pub fn with_level(mut self, level: IsolationLevel) -> Self {
        self.isolation_level = level;
        self
    }

    #[must_use]
    pub fn tenant_id(&self) -> &str {
        &self.base.tenant_id
    }

    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.base.user_id.as_deref()
    }

    /// The id populated at `level`, if any.
    #[must_use]
    pub fn id_at(&self, level: IsolationLevel) -> Option<&str> {
        match level {
            IsolationLevel::Tenant => Some(self.base.tenant_id.as_str()),
            IsolationLevel::Organization => self.organization_id.as_deref(),
            IsolationLevel::Department => self.department_id.as_deref(),
            IsolationLevel::User => self.base.user_id.as_deref(),
        }
    }

    /// Validates the base fields plus organization and department ids.
    ///
    /// Hierarchy shape is checked separately by [`crate::hierarchy`].
    ///
    /// # Errors
    ///
    /// Returns the first malformed field as a [`ValidationError`].
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.base.validate()?;
        if let Some(organization_id) = &self.organization_id {
            ids::validate_id("organizationId", organization_id)?;
        }
        if let Some(department_id) = &self.department_id {
            ids::validate_id("departmentId", department_id)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 10, 0, 0).unwrap()
    }

    #[test]
    fn levels_are_ordered_shallow_to_deep() {
        assert!(IsolationLevel::Tenant < IsolationLevel::Organization);
        assert!(IsolationLevel::Organization < IsolationLevel::Department);
        assert!(IsolationLevel::Department < IsolationLevel::User);
        assert_eq!(IsolationLevel::User.index(), 3);
    }

    #[test]
    fn level_parses_long_and_short_names() {
        assert_eq!("ORG".parse::<IsolationLevel>().unwrap(), IsolationLevel::Organization);
        assert_eq!("department".parse::<IsolationLevel>().unwrap(), IsolationLevel::Department);
        assert!("galaxy".parse::<IsolationLevel>().is_err());
    }

    #[test]
    fn level_serializes_lowercase() {
        let json = serde_json::to_string(&IsolationLevel::Organization).unwrap();
        assert_eq!(json, "\"organization\"");
    }

    #[test]
    fn tenant_context_validate_reports_first_bad_field() {
        let ctx = TenantContext::new("tenant-1", ts()).with_user("u");
        let err = ctx.validate().unwrap_err();
        assert_eq!(err.field, "userId");

        let ctx = TenantContext::new("tenant-1", ts()).with_request_id("short");
        assert_eq!(ctx.validate().unwrap_err().field, "requestId");

        let ctx = TenantContext::new("tenant-1", ts())
            .with_metadata("bad key", serde_json::json!(1));
        assert_eq!(ctx.validate().unwrap_err().field, "custom:bad key");
    }

    #[test]
    fn expiry_is_strictly_after_timeout() {
        let ctx = TenantContext::new("tenant-1", ts());
        let timeout = Duration::from_secs(60);
        assert!(!ctx.is_expired(ts() + chrono::Duration::seconds(60), timeout));
        assert!(ctx.is_expired(ts() + chrono::Duration::seconds(61), timeout));
    }

    #[test]
    fn multi_level_serde_flattens_base() {
        let ctx = MultiLevelContext::new("tenant-123", ts())
            .with_organization("org-456")
            .with_level(IsolationLevel::Organization);
        let json = serde_json::to_value(&ctx).unwrap();
        assert_eq!(json["tenantId"], "tenant-123");
        assert_eq!(json["organizationId"], "org-456");
        assert_eq!(json["isolationLevel"], "organization");

        let back: MultiLevelContext = serde_json::from_value(json).unwrap();
        assert_eq!(back, ctx);
    }

    #[test]
    fn id_at_maps_levels_to_fields() {
        let ctx = MultiLevelContext::new("t-1", ts())
            .with_organization("o-1")
            .with_department("d-1")
            .with_user("u-1");
        assert_eq!(ctx.id_at(IsolationLevel::Tenant), Some("t-1"));
        assert_eq!(ctx.id_at(IsolationLevel::Organization), Some("o-1"));
        assert_eq!(ctx.id_at(IsolationLevel::Department), Some("d-1"));
        assert_eq!(ctx.id_at(IsolationLevel::User), Some("u-1"));
    }
}
