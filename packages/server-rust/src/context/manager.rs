//! Typed, validated access to the tenant context of the current boundary.
//!
//! Lifecycle within one boundary: `UNSET -> SET -> UPDATED* -> CLEARED`.
//! Getters are legal in every state and return `None` when nothing (or only
//! an expired context) is stored. Writes validate first and then apply every
//! change in one store transaction, so a reader sharing the boundary never
//! sees the full object and a denormalized field disagree.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tenantscope_core::{
    hierarchy, ids, ClockSource, MultiLevelContext, TenantContext, TenantScopeConfig,
    ValidationError,
};
use tracing::{debug, warn};

use super::store::{ContextEntries, RequestContextStore};
use crate::error::ContextError;

/// Store keys used by the manager.
pub mod keys {
    pub const CONTEXT: &str = "tenant.context";
    pub const MULTI_LEVEL_CONTEXT: &str = "tenant.multiLevelContext";
    pub const TIMESTAMP: &str = "tenant.timestamp";
    pub const TENANT_ID: &str = "tenantId";
    pub const USER_ID: &str = "userId";
    pub const REQUEST_ID: &str = "requestId";
    pub const SESSION_ID: &str = "sessionId";
    pub const ORGANIZATION_ID: &str = "organizationId";
    pub const DEPARTMENT_ID: &str = "departmentId";
    pub const CUSTOM_PREFIX: &str = "custom:";

    /// Every key written by `set_context`/`set_multi_level_context`.
    pub const IDENTITY: [&str; 9] = [
        CONTEXT,
        MULTI_LEVEL_CONTEXT,
        TIMESTAMP,
        TENANT_ID,
        USER_ID,
        REQUEST_ID,
        SESSION_ID,
        ORGANIZATION_ID,
        DEPARTMENT_ID,
    ];
}

/// Validated get/set/update operations over [`RequestContextStore`].
///
/// The manager itself is stateless and shared (`Arc`) across all requests;
/// the data lives in the boundary of the calling task.
#[derive(Debug, Clone)]
pub struct TenantContextManager {
    config: Arc<TenantScopeConfig>,
    clock: Arc<dyn ClockSource>,
}

impl TenantContextManager {
    #[must_use]
    pub fn new(config: Arc<TenantScopeConfig>, clock: Arc<dyn ClockSource>) -> Self {
        Self { config, clock }
    }

    /// Current time according to the manager's clock.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -- writes -------------------------------------------------------------

    /// Validates and stores `ctx` together with its denormalized ids.
    ///
    /// Replaces any context (single- or multi-level) previously set in this
    /// boundary. Custom context entries are kept.
    ///
    /// # Errors
    ///
    /// [`ContextError::Validation`] for the first malformed field (store
    /// unchanged), [`ContextError::ContextUnavailable`] outside a boundary.
    pub fn set_context(&self, ctx: TenantContext) -> Result<(), ContextError> {
        if let Err(err) = ctx.validate() {
            warn!(field = %err.field, reason = %err.reason, "rejected tenant context");
            return Err(err.into());
        }
        RequestContextStore::transaction(|entries| {
            clear_identity(entries);
            write_base(entries, &ctx);
            entries.set(keys::CONTEXT, ctx);
        })?;
        debug!("tenant context set");
        Ok(())
    }

    /// Validates and stores a multi-level context.
    ///
    /// With hierarchy validation enabled the strict chain is enforced and
    /// `isolation_level` must equal the deepest populated level.
    ///
    /// # Errors
    ///
    /// [`ContextError::Validation`], [`ContextError::Isolation`] wrapping a
    /// `HierarchyViolation`, or [`ContextError::ContextUnavailable`].
    pub fn set_multi_level_context(&self, ctx: MultiLevelContext) -> Result<(), ContextError> {
        if let Err(err) = ctx.validate() {
            warn!(field = %err.field, reason = %err.reason, "rejected multi-level context");
            return Err(err.into());
        }
        if self.config.isolation.validate_hierarchy {
            if let Err(err) = hierarchy::check_declared_level(&ctx) {
                warn!(error = %err, "rejected multi-level context");
                return Err(err.into());
            }
        }
        RequestContextStore::transaction(|entries| {
            clear_identity(entries);
            write_base(entries, &ctx.base);
            if let Some(organization_id) = &ctx.organization_id {
                entries.set(keys::ORGANIZATION_ID, organization_id.clone());
            }
            if let Some(department_id) = &ctx.department_id {
                entries.set(keys::DEPARTMENT_ID, department_id.clone());
            }
            entries.set(keys::CONTEXT, ctx.base.clone());
            entries.set(keys::MULTI_LEVEL_CONTEXT, ctx);
        })?;
        debug!("multi-level context set");
        Ok(())
    }

    /// Switches the tenant of the stored context.
    ///
    /// # Errors
    ///
    /// [`ContextError::Validation`] for a malformed id or, with
    /// `validate_permissions`, a switch to a different tenant;
    /// [`ContextError::NotSet`] when no context was set in this boundary.
    pub fn update_tenant(&self, tenant_id: &str) -> Result<(), ContextError> {
        ids::validate_id("tenantId", tenant_id)?;
        let enforce_same_tenant = self.config.context.validate_permissions;
        RequestContextStore::transaction(|entries| -> Result<(), ContextError> {
            let mut ctx = entries
                .get::<TenantContext>(keys::CONTEXT)
                .ok_or(ContextError::NotSet)?;
            if enforce_same_tenant && ctx.tenant_id != tenant_id {
                warn!(
                    from = %ctx.tenant_id,
                    to = tenant_id,
                    "tenant switch rejected"
                );
                return Err(ValidationError::new(
                    "tenantId",
                    "switching tenants within a request is not permitted",
                )
                .into());
            }
            ctx.tenant_id = tenant_id.to_string();
            if let Some(mut multi) = entries.get::<MultiLevelContext>(keys::MULTI_LEVEL_CONTEXT) {
                multi.base.tenant_id = tenant_id.to_string();
                entries.set(keys::MULTI_LEVEL_CONTEXT, multi);
            }
            entries.set(keys::TENANT_ID, tenant_id.to_string());
            entries.set(keys::CONTEXT, ctx);
            Ok(())
        })?
    }

    /// Switches the user of the stored context.
    ///
    /// # Errors
    ///
    /// [`ContextError::Validation`] for a malformed id, [`ContextError::NotSet`]
    /// when no context was set, or [`ContextError::Isolation`] when the stored
    /// context is multi-level, hierarchy validation is on, and the user would
    /// break the chain.
    pub fn update_user(&self, user_id: &str) -> Result<(), ContextError> {
        ids::validate_id("userId", user_id)?;
        let validate_hierarchy = self.config.isolation.validate_hierarchy;
        RequestContextStore::transaction(|entries| -> Result<(), ContextError> {
            let mut ctx = entries
                .get::<TenantContext>(keys::CONTEXT)
                .ok_or(ContextError::NotSet)?;
            if let Some(mut multi) = entries.get::<MultiLevelContext>(keys::MULTI_LEVEL_CONTEXT) {
                multi.base.user_id = Some(user_id.to_string());
                if validate_hierarchy {
                    multi.isolation_level = hierarchy::deepest_level(&multi)?;
                }
                entries.set(keys::MULTI_LEVEL_CONTEXT, multi);
            }
            ctx.user_id = Some(user_id.to_string());
            entries.set(keys::USER_ID, user_id.to_string());
            entries.set(keys::CONTEXT, ctx);
            Ok(())
        })?
    }

    /// Stores a free-form value under `custom:<key>` and in the context metadata.
    ///
    /// Allowed before a context is set; the metadata merge then simply has
    /// nothing to merge into.
    ///
    /// # Errors
    ///
    /// [`ContextError::Validation`] for a malformed key,
    /// [`ContextError::ContextUnavailable`] outside a boundary.
    pub fn set_custom_context(
        &self,
        key: &str,
        value: serde_json::Value,
    ) -> Result<(), ContextError> {
        ids::validate_custom_key(key)?;
        RequestContextStore::transaction(|entries| {
            if let Some(mut ctx) = entries.get::<TenantContext>(keys::CONTEXT) {
                ctx.metadata.insert(key.to_string(), value.clone());
                entries.set(keys::CONTEXT, ctx);
            }
            if let Some(mut multi) = entries.get::<MultiLevelContext>(keys::MULTI_LEVEL_CONTEXT) {
                multi.base.metadata.insert(key.to_string(), value.clone());
                entries.set(keys::MULTI_LEVEL_CONTEXT, multi);
            }
            entries.set(custom_key(key), value);
        })
    }

    /// Removes every key of the current boundary, tenant-related or not.
    pub fn clear_context(&self) {
        RequestContextStore::clear();
        debug!("tenant context cleared");
    }

    // -- reads --------------------------------------------------------------

    /// The stored context, unless absent or expired.
    #[must_use]
    pub fn context(&self) -> Option<TenantContext> {
        let ctx = RequestContextStore::get::<TenantContext>(keys::CONTEXT)?;
        self.live(&ctx).then_some(ctx)
    }

    /// The stored multi-level context, unless absent or expired.
    #[must_use]
    pub fn multi_level_context(&self) -> Option<MultiLevelContext> {
        let ctx = RequestContextStore::get::<MultiLevelContext>(keys::MULTI_LEVEL_CONTEXT)?;
        self.live(&ctx.base).then_some(ctx)
    }

    /// The stored context lifted to multi-level form.
    ///
    /// Returns the multi-level context when one was set, otherwise the plain
    /// context at tenant scope.
    #[must_use]
    pub fn effective_context(&self) -> Option<MultiLevelContext> {
        self.multi_level_context()
            .or_else(|| self.context().map(MultiLevelContext::from_tenant))
    }

    #[must_use]
    pub fn has_context(&self) -> bool {
        self.context().is_some()
    }

    #[must_use]
    pub fn tenant(&self) -> Option<String> {
        self.fast_path(keys::TENANT_ID)
    }

    #[must_use]
    pub fn user(&self) -> Option<String> {
        self.fast_path(keys::USER_ID)
    }

    #[must_use]
    pub fn request_id(&self) -> Option<String> {
        self.fast_path(keys::REQUEST_ID)
    }

    #[must_use]
    pub fn session_id(&self) -> Option<String> {
        self.fast_path(keys::SESSION_ID)
    }

    #[must_use]
    pub fn organization(&self) -> Option<String> {
        self.fast_path(keys::ORGANIZATION_ID)
    }

    #[must_use]
    pub fn department(&self) -> Option<String> {
        self.fast_path(keys::DEPARTMENT_ID)
    }

    /// Value stored by [`TenantContextManager::set_custom_context`].
    #[must_use]
    pub fn custom_context(&self, key: &str) -> Option<serde_json::Value> {
        RequestContextStore::get::<serde_json::Value>(&custom_key(key))
    }

    fn fast_path(&self, key: &str) -> Option<String> {
        RequestContextStore::inspect(|entries| {
            let live = entries
                .peek::<TenantContext, _>(keys::CONTEXT, |ctx| self.live(ctx))
                .unwrap_or(true);
            if live {
                entries.get::<String>(key)
            } else {
                None
            }
        })
        .flatten()
    }

    fn live(&self, ctx: &TenantContext) -> bool {
        let Some(timeout) = self.config.context.context_timeout() else {
            return true;
        };
        let expired = ctx.is_expired(self.clock.now(), timeout);
        if expired {
            debug!(timestamp = %ctx.timestamp, timeout_ms = ?self.config.context.context_timeout_ms, "tenant context expired");
        }
        !expired
    }
}

fn custom_key(key: &str) -> String {
    format!("{}{key}", keys::CUSTOM_PREFIX)
}

fn clear_identity(entries: &mut ContextEntries) {
    for key in keys::IDENTITY {
        entries.remove(key);
    }
}

fn write_base(entries: &mut ContextEntries, ctx: &TenantContext) {
    entries.set(keys::TIMESTAMP, ctx.timestamp);
    entries.set(keys::TENANT_ID, ctx.tenant_id.clone());
    if let Some(user_id) = &ctx.user_id {
        entries.set(keys::USER_ID, user_id.clone());
    }
    if let Some(request_id) = &ctx.request_id {
        entries.set(keys::REQUEST_ID, request_id.clone());
    }
    if let Some(session_id) = &ctx.session_id {
        entries.set(keys::SESSION_ID, session_id.clone());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
