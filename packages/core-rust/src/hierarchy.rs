//! Hierarchy validation for the tenant → organization → department → user chain.
//!
//! The chain is strict: a level may only be populated when every shallower
//! level is populated too. Skipping a level is a [`IsolationError::HierarchyViolation`],
//! never a silent downgrade.

use crate::context::{IsolationLevel, MultiLevelContext};
use crate::error::IsolationError;

/// Returns `true` when `ctx` satisfies the strict chain.
#[must_use]
pub fn validate_hierarchy(ctx: &MultiLevelContext) -> bool {
    check_hierarchy(ctx).is_ok()
}

/// Same as [`validate_hierarchy`], reporting which level broke the chain.
///
/// # Errors
///
/// Returns [`IsolationError::HierarchyViolation`] for the first populated level
/// whose parent is missing.
pub fn check_hierarchy(ctx: &MultiLevelContext) -> Result<(), IsolationError> {
    determine_isolation_level(
        ctx.tenant_id(),
        ctx.organization_id.as_deref(),
        ctx.department_id.as_deref(),
        ctx.user_id(),
    )
    .map(|_| ())
}

/// Computes the deepest populated level.
///
/// # Errors
///
/// Returns [`IsolationError::HierarchyViolation`] when the tenant id is empty
/// or a deep field is populated while a shallower one is missing.
pub fn determine_isolation_level(
    tenant_id: &str,
    organization_id: Option<&str>,
    department_id: Option<&str>,
    user_id: Option<&str>,
) -> Result<IsolationLevel, IsolationError> {
    if tenant_id.is_empty() {
        return Err(IsolationError::hierarchy(
            IsolationLevel::Tenant,
            "tenant id is required",
        ));
    }
    if user_id.is_some() && department_id.is_none() {
        return Err(IsolationError::hierarchy(
            IsolationLevel::User,
            "user id requires a department id",
        ));
    }
    if department_id.is_some() && organization_id.is_none() {
        return Err(IsolationError::hierarchy(
            IsolationLevel::Department,
            "department id requires an organization id",
        ));
    }

    let level = if user_id.is_some() {
        IsolationLevel::User
    } else if department_id.is_some() {
        IsolationLevel::Department
    } else if organization_id.is_some() {
        IsolationLevel::Organization
    } else {
        IsolationLevel::Tenant
    };
    Ok(level)
}

/// Deepest populated level of `ctx`, with the chain enforced.
///
/// # Errors
///
/// See [`determine_isolation_level`].
pub fn deepest_level(ctx: &MultiLevelContext) -> Result<IsolationLevel, IsolationError> {
    determine_isolation_level(
        ctx.tenant_id(),
        ctx.organization_id.as_deref(),
        ctx.department_id.as_deref(),
        ctx.user_id(),
    )
}

/// Checks the chain and that `isolation_level` equals the deepest populated level.
///
/// # Errors
///
/// Returns [`IsolationError::HierarchyViolation`] on a broken chain or a
/// declared level that differs from the populated depth.
pub fn check_declared_level(ctx: &MultiLevelContext) -> Result<(), IsolationError> {
    let deepest = deepest_level(ctx)?;
    if deepest == ctx.isolation_level {
        Ok(())
    } else {
        Err(IsolationError::hierarchy(
            ctx.isolation_level,
            format!(
                "declared isolation level {} but deepest populated level is {deepest}",
                ctx.isolation_level
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn full() -> MultiLevelContext {
        MultiLevelContext::new("tenant-123", Utc::now())
            .with_organization("org-456")
            .with_department("dept-789")
            .with_user("user-101")
            .with_level(IsolationLevel::User)
    }

    #[test]
    fn full_chain_is_valid() {
        assert!(validate_hierarchy(&full()));
        assert_eq!(deepest_level(&full()).unwrap(), IsolationLevel::User);
    }

    #[test]
    fn tenant_only_is_valid() {
        let ctx = MultiLevelContext::new("tenant-123", Utc::now());
        assert!(validate_hierarchy(&ctx));
        assert_eq!(deepest_level(&ctx).unwrap(), IsolationLevel::Tenant);
    }

    #[test]
    fn department_without_organization_is_rejected() {
        let mut ctx = full();
        ctx.organization_id = None;
        assert!(!validate_hierarchy(&ctx));
        let err = check_hierarchy(&ctx).unwrap_err();
        assert!(matches!(
            err,
            IsolationError::HierarchyViolation {
                level: IsolationLevel::Department,
                ..
            }
        ));
    }

    #[test]
    fn user_without_department_is_rejected() {
        let ctx = MultiLevelContext::new("tenant-123", Utc::now())
            .with_organization("org-456")
            .with_user("user-101");
        let err = check_hierarchy(&ctx).unwrap_err();
        assert!(matches!(
            err,
            IsolationError::HierarchyViolation {
                level: IsolationLevel::User,
                ..
            }
        ));
    }

    #[test]
    fn determine_level_picks_deepest() {
        assert_eq!(
            determine_isolation_level("t-1", Some("o-1"), None, None).unwrap(),
            IsolationLevel::Organization
        );
        assert_eq!(
            determine_isolation_level("t-1", Some("o-1"), Some("d-1"), None).unwrap(),
            IsolationLevel::Department
        );
    }

    #[test]
    fn determine_level_never_downgrades() {
        // A user id without its parents is an error, not a tenant-level context.
        assert!(determine_isolation_level("t-1", None, None, Some("u-1")).is_err());
        assert!(determine_isolation_level("", None, None, None).is_err());
    }

    #[test]
    fn declared_level_must_match_depth() {
        assert!(check_declared_level(&full()).is_ok());
        let narrowed = full().with_level(IsolationLevel::Organization);
        assert!(check_declared_level(&narrowed).is_err());
    }
}
