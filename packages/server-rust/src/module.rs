//! Wires the context manager, isolation service, and extractor together.
//!
//! `TenantScope::new()` validates the configuration and allocates every shared
//! component once. Other parts of the host (storage adapters, caches, routers)
//! take `Arc` handles from it, and `layer()` produces the HTTP middleware that
//! installs each request's context.

use std::sync::Arc;

use tenantscope_core::{ClockSource, SystemClock, TenantScopeConfig};
use tracing::info;

use crate::context::TenantContextManager;
use crate::error::SetupError;
use crate::isolation::IsolationService;
use crate::middleware::{ContextExtractor, TenantContextLayer};

#[derive(Debug)]
pub struct TenantScope {
    config: Arc<TenantScopeConfig>,
    manager: Arc<TenantContextManager>,
    isolation: Arc<IsolationService>,
    extractor: ContextExtractor,
}

impl TenantScope {
    /// Builds every component against the system clock.
    ///
    /// # Errors
    ///
    /// [`SetupError::Config`] for an invalid configuration,
    /// [`SetupError::Isolation`] for a strategy without an implementation.
    pub fn new(config: TenantScopeConfig) -> Result<Self, SetupError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Builds every component against `clock`.
    ///
    /// # Errors
    ///
    /// See [`TenantScope::new`].
    pub fn with_clock(
        config: TenantScopeConfig,
        clock: Arc<dyn ClockSource>,
    ) -> Result<Self, SetupError> {
        config.validate()?;
        let isolation = IsolationService::new(&config.isolation, Arc::clone(&clock))?;
        let config = Arc::new(config);
        info!(
            strategy = %config.isolation.strategy,
            validate_hierarchy = config.isolation.validate_hierarchy,
            validate_permissions = config.context.validate_permissions,
            context_timeout_ms = ?config.context.context_timeout_ms,
            "tenant scope initialised"
        );

        Ok(Self {
            manager: Arc::new(TenantContextManager::new(
                Arc::clone(&config),
                Arc::clone(&clock),
            )),
            isolation: Arc::new(isolation),
            extractor: ContextExtractor::new(clock),
            config,
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<TenantScopeConfig> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn manager(&self) -> Arc<TenantContextManager> {
        Arc::clone(&self.manager)
    }

    #[must_use]
    pub fn isolation(&self) -> Arc<IsolationService> {
        Arc::clone(&self.isolation)
    }

    #[must_use]
    pub fn extractor(&self) -> ContextExtractor {
        self.extractor.clone()
    }

    /// Middleware that opens a boundary per request and installs its context.
    #[must_use]
    pub fn layer(&self) -> TenantContextLayer {
        TenantContextLayer::new(self.manager(), self.extractor())
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;

    use http::Request;
    use tenantscope_core::{IsolationConfig, StrategyKind};
    use tower::{Layer, ServiceExt};

    use super::*;

    #[test]
    fn handles_are_shared() {
        let scope = TenantScope::new(TenantScopeConfig::default()).unwrap();
        assert!(Arc::ptr_eq(&scope.manager(), &scope.manager()));
        assert!(Arc::ptr_eq(&scope.isolation(), &scope.isolation()));
        assert!(Arc::ptr_eq(&scope.config(), &scope.config()));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = TenantScopeConfig::default();
        config.isolation.max_key_length = 0;
        assert!(matches!(
            TenantScope::new(config).unwrap_err(),
            SetupError::Config(_)
        ));
    }

    #[test]
    fn unsupported_strategy_is_rejected() {
        let config = TenantScopeConfig {
            isolation: IsolationConfig {
                strategy: StrategyKind::DatabasePerTenant,
                ..IsolationConfig::default()
            },
            ..TenantScopeConfig::default()
        };
        assert!(matches!(
            TenantScope::new(config).unwrap_err(),
            SetupError::Isolation(_)
        ));
    }

    #[tokio::test]
    async fn request_flow_derives_scoped_keys() {
        let scope = TenantScope::new(TenantScopeConfig::default()).unwrap();
        let manager = scope.manager();
        let isolation = scope.isolation();
        let svc = scope.layer().layer(tower::service_fn(move |_req: Request<()>| {
            let manager = Arc::clone(&manager);
            let isolation = Arc::clone(&isolation);
            async move { Ok::<_, Infallible>(isolation.current_isolation_key("cart", &manager)) }
        }));

        let req = Request::builder()
            .header("x-tenant-id", "tenant-123")
            .header("x-organization-id", "org-456")
            .header("x-department-id", "dept-789")
            .header("x-user-id", "user-101")
            .body(())
            .unwrap();
        let key = svc.oneshot(req).await.unwrap().unwrap();
        assert_eq!(
            key,
            "multi:tenant:tenant-123:org:org-456:dept:dept-789:user:user-101:cart"
        );
    }
}
