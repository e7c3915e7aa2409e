//! Instrumented facade over an [`IsolationStrategy`].
//!
//! Storage and cache collaborators call this instead of the strategy directly:
//! every operation is timed and recorded in [`IsolationMetrics`] at the level
//! of the context it ran for, and multi-level key derivation is fronted by a
//! bounded, shared cache.

use std::sync::Arc;
use std::time::Instant;

use quick_cache::sync::Cache;
use serde_json::Value;
use tenantscope_core::{
    build_strategy, ClockSource, IsolationConfig, IsolationError, IsolationLevel,
    IsolationStrategy, MultiLevelContext, StrategyKind,
};

use super::metrics::IsolationMetrics;
use crate::context::TenantContextManager;
use crate::error::ContextError;

pub struct IsolationService {
    strategy: Arc<dyn IsolationStrategy>,
    metrics: Arc<IsolationMetrics>,
    key_cache: Option<Cache<KeyCacheKey, String>>,
}

impl IsolationService {
    /// Builds the configured strategy and wraps it.
    ///
    /// # Errors
    ///
    /// [`IsolationError::UnsupportedStrategy`] for strategies without an implementation.
    pub fn new(config: &IsolationConfig, clock: Arc<dyn ClockSource>) -> Result<Self, IsolationError> {
        let strategy = build_strategy(config, clock)?;
        Ok(Self::with_strategy(strategy, config.key_cache_capacity))
    }

    /// Wraps an existing strategy. A `key_cache_capacity` of 0 disables caching.
    #[must_use]
    pub fn with_strategy(strategy: Arc<dyn IsolationStrategy>, key_cache_capacity: usize) -> Self {
        let key_cache = (key_cache_capacity > 0).then(|| Cache::new(key_cache_capacity));
        Self {
            strategy,
            metrics: Arc::new(IsolationMetrics::new()),
            key_cache,
        }
    }

    #[must_use]
    pub fn kind(&self) -> StrategyKind {
        self.strategy.kind()
    }

    #[must_use]
    pub fn metrics(&self) -> Arc<IsolationMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Resets the per-level statistics.
    pub fn reset_stats(&self) {
        self.metrics.reset_stats();
    }

    fn observe<T>(
        &self,
        level: IsolationLevel,
        op: impl FnOnce() -> Result<T, IsolationError>,
    ) -> Result<T, IsolationError> {
        let start = Instant::now();
        let result = op();
        self.metrics
            .record_operation(level, start.elapsed(), result.is_ok());
        if let Err(err) = &result {
            tracing::debug!(level = %level, error = %err, "isolation operation failed");
        }
        result
    }

    // -- single level -------------------------------------------------------

    #[must_use]
    pub fn tenant_key(&self, key: &str, tenant_id: &str) -> String {
        let start = Instant::now();
        let out = self.strategy.tenant_key(key, tenant_id);
        self.metrics
            .record_operation(IsolationLevel::Tenant, start.elapsed(), true);
        out
    }

    #[must_use]
    pub fn tenant_namespace(&self, tenant_id: &str) -> String {
        let start = Instant::now();
        let out = self.strategy.tenant_namespace(tenant_id);
        self.metrics
            .record_operation(IsolationLevel::Tenant, start.elapsed(), true);
        out
    }

    #[must_use]
    pub fn isolate_data(&self, data: &Value, tenant_id: &str) -> Value {
        let start = Instant::now();
        let out = self.strategy.isolate_data(data, tenant_id);
        self.metrics
            .record_operation(IsolationLevel::Tenant, start.elapsed(), true);
        out
    }

    /// # Errors
    ///
    /// [`IsolationError::IsolationMismatch`] when the envelope belongs to another tenant.
    pub fn extract_tenant_data(&self, data: &Value, tenant_id: &str) -> Result<Value, IsolationError> {
        self.observe(IsolationLevel::Tenant, || {
            self.strategy.extract_tenant_data(data, tenant_id)
        })
    }

    #[must_use]
    pub fn should_isolate(&self, tenant_id: &str) -> bool {
        self.strategy.should_isolate(tenant_id)
    }

    // -- multi level --------------------------------------------------------

    /// Multi-level key for `key`, served from the key cache when possible.
    ///
    /// # Errors
    ///
    /// As for [`IsolationStrategy::isolation_key`]. Failures are never cached.
    pub fn isolation_key(&self, key: &str, ctx: &MultiLevelContext) -> Result<String, IsolationError> {
        let level = ctx.isolation_level;
        let Some(cache) = &self.key_cache else {
            return self.observe(level, || self.strategy.isolation_key(key, ctx));
        };

        let cache_key = KeyCacheKey::new(key, ctx);
        if let Some(hit) = cache.get(&cache_key) {
            self.metrics.record_cache(level, true);
            return self.observe(level, || Ok(hit));
        }
        self.metrics.record_cache(level, false);
        let derived = self.observe(level, || self.strategy.isolation_key(key, ctx))?;
        cache.insert(cache_key, derived.clone());
        Ok(derived)
    }

    /// # Errors
    ///
    /// As for [`IsolationStrategy::isolation_namespace`].
    pub fn isolation_namespace(&self, ctx: &MultiLevelContext) -> Result<String, IsolationError> {
        self.observe(ctx.isolation_level, || self.strategy.isolation_namespace(ctx))
    }

    /// # Errors
    ///
    /// As for [`IsolationStrategy::isolate_multi_level`].
    pub fn isolate_multi_level(&self, data: &Value, ctx: &MultiLevelContext) -> Result<Value, IsolationError> {
        self.observe(ctx.isolation_level, || {
            self.strategy.isolate_multi_level(data, ctx)
        })
    }

    /// # Errors
    ///
    /// As for [`IsolationStrategy::extract_data`].
    pub fn extract_data(&self, data: &Value, ctx: &MultiLevelContext) -> Result<Value, IsolationError> {
        self.observe(ctx.isolation_level, || self.strategy.extract_data(data, ctx))
    }

    /// Order-preserving batch; the first failing key aborts the whole batch.
    ///
    /// # Errors
    ///
    /// The first error produced by any key.
    pub fn isolation_keys(&self, keys: &[&str], ctx: &MultiLevelContext) -> Result<Vec<String>, IsolationError> {
        keys.iter().map(|key| self.isolation_key(key, ctx)).collect()
    }

    /// Order-preserving batch; the first failing item aborts the whole batch.
    ///
    /// # Errors
    ///
    /// The first error produced by any item.
    pub fn isolate_data_list(&self, items: &[Value], ctx: &MultiLevelContext) -> Result<Vec<Value>, IsolationError> {
        items
            .iter()
            .map(|item| self.isolate_multi_level(item, ctx))
            .collect()
    }

    // -- current boundary ---------------------------------------------------

    /// Key for `key` under the context of the calling task's boundary.
    ///
    /// # Errors
    ///
    /// [`ContextError::NotSet`] without a (live) context, otherwise
    /// [`ContextError::Isolation`] from key derivation.
    pub fn current_isolation_key(
        &self,
        key: &str,
        manager: &TenantContextManager,
    ) -> Result<String, ContextError> {
        let ctx = manager.effective_context().ok_or(ContextError::NotSet)?;
        Ok(self.isolation_key(key, &ctx)?)
    }

    /// Envelope for `data` under the context of the calling task's boundary.
    ///
    /// # Errors
    ///
    /// [`ContextError::NotSet`] without a (live) context.
    pub fn isolate_current(
        &self,
        data: &Value,
        manager: &TenantContextManager,
    ) -> Result<Value, ContextError> {
        let ctx = manager.effective_context().ok_or(ContextError::NotSet)?;
        Ok(self.isolate_multi_level(data, &ctx)?)
    }

    /// Business payload of `data`, checked against the current boundary's context.
    ///
    /// # Errors
    ///
    /// [`ContextError::NotSet`] without a (live) context,
    /// [`ContextError::Isolation`] on a mismatching envelope.
    pub fn extract_current(
        &self,
        data: &Value,
        manager: &TenantContextManager,
    ) -> Result<Value, ContextError> {
        let ctx = manager.effective_context().ok_or(ContextError::NotSet)?;
        Ok(self.extract_data(data, &ctx)?)
    }
}

impl std::fmt::Debug for IsolationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IsolationService")
            .field("strategy", &self.strategy)
            .field("key_cache", &self.key_cache.as_ref().map(Cache::len))
            .finish_non_exhaustive()
    }
}

/// Every context field that can influence the derived key, plus the key itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct KeyCacheKey {
    level: IsolationLevel,
    tenant_id: String,
    organization_id: Option<String>,
    department_id: Option<String>,
    user_id: Option<String>,
    key: String,
}

impl KeyCacheKey {
    fn new(key: &str, ctx: &MultiLevelContext) -> Self {
        Self {
            level: ctx.isolation_level,
            tenant_id: ctx.tenant_id().to_owned(),
            organization_id: ctx.organization_id.clone(),
            department_id: ctx.department_id.clone(),
            user_id: ctx.user_id().map(str::to_owned),
            key: key.to_owned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;
    use tenantscope_core::{SystemClock, TenantContext, TenantScopeConfig};

    use super::*;
    use crate::context::RequestContextStore;

    fn service() -> IsolationService {
        IsolationService::new(&IsolationConfig::default(), Arc::new(SystemClock)).unwrap()
    }

    fn user_ctx() -> MultiLevelContext {
        MultiLevelContext::new("tenant-123", Utc::now())
            .with_organization("org-456")
            .with_department("dept-789")
            .with_user("user-101")
            .with_level(IsolationLevel::User)
    }

    #[test]
    fn unsupported_strategy_is_rejected_at_construction() {
        let config = IsolationConfig {
            strategy: StrategyKind::SchemaPerTenant,
            ..IsolationConfig::default()
        };
        let err = IsolationService::new(&config, Arc::new(SystemClock)).unwrap_err();
        assert!(matches!(err, IsolationError::UnsupportedStrategy(_)));
    }

    #[test]
    fn isolation_key_is_recorded_at_context_level() {
        let svc = service();
        let key = svc.isolation_key("u:1", &user_ctx()).unwrap();
        assert_eq!(
            key,
            "multi:tenant:tenant-123:org:org-456:dept:dept-789:user:user-101:u:1"
        );
        let stats = svc.metrics().snapshot(IsolationLevel::User);
        assert_eq!(stats.operations, 1);
        assert_eq!(stats.successes, 1);
        assert_eq!(svc.metrics().snapshot(IsolationLevel::Tenant).operations, 0);
    }

    #[test]
    fn repeated_keys_hit_the_cache() {
        let svc = service();
        let first = svc.isolation_key("k", &user_ctx()).unwrap();
        let second = svc.isolation_key("k", &user_ctx()).unwrap();
        assert_eq!(first, second);
        let stats = svc.metrics().snapshot(IsolationLevel::User);
        assert_eq!(stats.cache_misses, 1);
        assert_eq!(stats.cache_hits, 1);
        assert!((stats.hit_rate - 0.5).abs() < 1e-9);
    }

    #[test]
    fn cache_distinguishes_scope() {
        let svc = service();
        let user = svc.isolation_key("k", &user_ctx()).unwrap();
        let dept_ctx = MultiLevelContext {
            base: TenantContext {
                user_id: None,
                ..user_ctx().base
            },
            ..user_ctx()
        }
        .with_level(IsolationLevel::Department);
        let dept = svc.isolation_key("k", &dept_ctx).unwrap();
        assert_ne!(user, dept);
    }

    #[test]
    fn cache_never_serves_a_key_to_a_differently_shaped_context() {
        let svc = service();
        let org_in_key = MultiLevelContext::new("acme", Utc::now()).with_organization("ops");
        assert_eq!(
            svc.isolation_key("\u{1f}k", &org_in_key).unwrap(),
            "multi:tenant:acme:\u{1f}k"
        );

        let smuggled = MultiLevelContext::new("acme\u{1f}ops", Utc::now());
        assert!(matches!(
            svc.isolation_key("k", &smuggled),
            Err(IsolationError::InvalidId(_))
        ));
        let stats = svc.metrics().snapshot(IsolationLevel::Tenant);
        assert_eq!(stats.cache_hits, 0);
        assert_eq!(stats.cache_misses, 2);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn disabled_cache_never_records_lookups() {
        let strategy = build_strategy(&IsolationConfig::default(), Arc::new(SystemClock)).unwrap();
        let svc = IsolationService::with_strategy(strategy, 0);
        svc.isolation_key("k", &user_ctx()).unwrap();
        svc.isolation_key("k", &user_ctx()).unwrap();
        let stats = svc.metrics().snapshot(IsolationLevel::User);
        assert_eq!(stats.operations, 2);
        assert_eq!(stats.cache_hits + stats.cache_misses, 0);
    }

    #[test]
    fn failures_are_counted_and_not_cached() {
        let config = IsolationConfig {
            max_key_length: 10,
            ..IsolationConfig::default()
        };
        let svc = IsolationService::new(&config, Arc::new(SystemClock)).unwrap();
        assert!(svc.isolation_key("k", &user_ctx()).is_err());
        assert!(svc.isolation_key("k", &user_ctx()).is_err());
        let stats = svc.metrics().snapshot(IsolationLevel::User);
        assert_eq!(stats.failures, 2);
        assert_eq!(stats.cache_misses, 2);
        assert!((stats.error_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn tenant_mismatch_counts_as_failure() {
        let svc = service();
        let sealed = svc.isolate_data(&json!({"a": 1}), "t1");
        assert!(svc.extract_tenant_data(&sealed, "t2").is_err());
        let stats = svc.metrics().snapshot(IsolationLevel::Tenant);
        assert_eq!(stats.operations, 2);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn batch_aborts_on_first_failure() {
        let config = IsolationConfig {
            max_key_length: 70,
            ..IsolationConfig::default()
        };
        let svc = IsolationService::new(&config, Arc::new(SystemClock)).unwrap();
        let long = "z".repeat(32);
        let err = svc
            .isolation_keys(&["a", long.as_str(), "b"], &user_ctx())
            .unwrap_err();
        assert!(matches!(err, IsolationError::KeyTooLong { .. }));
    }

    #[test]
    fn reset_stats_clears_metrics() {
        let svc = service();
        svc.tenant_key("k", "t1");
        svc.reset_stats();
        assert_eq!(svc.metrics().snapshot(IsolationLevel::Tenant).operations, 0);
    }

    #[test]
    fn current_context_helpers_use_boundary() {
        let svc = service();
        let manager = TenantContextManager::new(
            Arc::new(TenantScopeConfig::default()),
            Arc::new(SystemClock),
        );
        assert_eq!(
            svc.current_isolation_key("k", &manager).unwrap_err(),
            ContextError::NotSet
        );

        RequestContextStore::run_sync(|| {
            manager
                .set_context(TenantContext::new("tenant-123", Utc::now()))
                .unwrap();
            assert_eq!(
                svc.current_isolation_key("user:456", &manager).unwrap(),
                "multi:tenant:tenant-123:user:456"
            );

            let sealed = svc.isolate_current(&json!({"v": 1}), &manager).unwrap();
            assert_eq!(sealed["_tenantId"], "tenant-123");
            assert_eq!(svc.extract_current(&sealed, &manager).unwrap(), json!({"v": 1}));
        });
    }
}
