//! Namespace isolation: keys live inside a per-scope namespace.
//!
//! Keys are `"{namespace}:{key}"`, where the namespace is the one the
//! key-prefix strategy derives. Envelopes are identical to key-prefix ones.

use std::sync::Arc;

use serde_json::Value;

use super::{enforce_max_length, IsolationStrategy, KeyPrefixStrategy, StrategyKind};
use crate::clock::ClockSource;
use crate::config::IsolationConfig;
use crate::context::MultiLevelContext;
use crate::error::IsolationError;

#[derive(Debug)]
pub struct NamespaceStrategy {
    inner: KeyPrefixStrategy,
}

impl NamespaceStrategy {
    #[must_use]
    pub fn new(config: Arc<IsolationConfig>, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            inner: KeyPrefixStrategy::new(config, clock),
        }
    }
}

impl IsolationStrategy for NamespaceStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Namespace
    }

    fn tenant_key(&self, key: &str, tenant_id: &str) -> String {
        format!("{}:{key}", self.inner.tenant_namespace(tenant_id))
    }

    fn tenant_namespace(&self, tenant_id: &str) -> String {
        self.inner.tenant_namespace(tenant_id)
    }

    fn isolate_data(&self, data: &Value, tenant_id: &str) -> Value {
        self.inner.isolate_data(data, tenant_id)
    }

    fn extract_tenant_data(&self, data: &Value, tenant_id: &str) -> Result<Value, IsolationError> {
        self.inner.extract_tenant_data(data, tenant_id)
    }

    fn isolation_key(&self, key: &str, ctx: &MultiLevelContext) -> Result<String, IsolationError> {
        let namespace = self.inner.isolation_namespace(ctx)?;
        enforce_max_length(
            format!("{namespace}:{key}"),
            self.inner.config().max_key_length,
        )
    }

    fn isolation_namespace(&self, ctx: &MultiLevelContext) -> Result<String, IsolationError> {
        self.inner.isolation_namespace(ctx)
    }

    fn isolate_multi_level(
        &self,
        data: &Value,
        ctx: &MultiLevelContext,
    ) -> Result<Value, IsolationError> {
        self.inner.isolate_multi_level(data, ctx)
    }

    fn extract_data(&self, data: &Value, ctx: &MultiLevelContext) -> Result<Value, IsolationError> {
        self.inner.extract_data(data, ctx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;
    use crate::clock::SystemClock;
    use crate::context::IsolationLevel;

    fn strategy() -> NamespaceStrategy {
        NamespaceStrategy::new(
            Arc::new(IsolationConfig {
                strategy: StrategyKind::Namespace,
                ..IsolationConfig::default()
            }),
            Arc::new(SystemClock),
        )
    }

    #[test]
    fn tenant_key_is_inside_namespace() {
        assert_eq!(
            strategy().tenant_key("user:456", "tenant-123"),
            "tenant_tenant-123:user:456"
        );
    }

    #[test]
    fn isolation_key_appends_to_multi_level_namespace() {
        let ctx = MultiLevelContext::new("tenant-123", Utc::now())
            .with_organization("org-456")
            .with_level(IsolationLevel::Organization);
        assert_eq!(
            strategy().isolation_key("k", &ctx).unwrap(),
            "tenant_tenant-123:org_org-456:k"
        );
    }

    #[test]
    fn envelopes_match_key_prefix_semantics() {
        let s = strategy();
        let sealed = s.isolate_data(&json!({"a": 1}), "t1");
        assert_eq!(s.extract_tenant_data(&sealed, "t1").unwrap(), json!({"a": 1}));
        assert!(s.extract_tenant_data(&sealed, "t2").is_err());
    }
}
