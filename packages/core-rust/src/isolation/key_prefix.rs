//! Key-prefix isolation: hierarchy ids become a prefix on shared storage keys.
//!
//! ```text
//! tenant_key("user:456", "tenant-123")   -> tenant:tenant-123:user:456
//! isolation_key("u:1", user-level ctx)    -> multi:tenant:tenant-123:org:org-456:dept:dept-789:user:user-101:u:1
//! isolation_namespace(user-level ctx)    -> tenant_tenant-123:org_org-456:dept_dept-789:user_user-101
//! ```

use std::sync::Arc;

use chrono::SecondsFormat;
use serde_json::{Map, Value};

use super::envelope::{self, ISOLATED_AT_FIELD, LEVEL_FIELD, TENANT_FIELD};
use super::{enforce_max_length, scoped_segments, IsolationStrategy, StrategyKind};
use crate::clock::ClockSource;
use crate::config::IsolationConfig;
use crate::context::MultiLevelContext;
use crate::error::IsolationError;

/// The fully specified isolation strategy.
#[derive(Debug)]
pub struct KeyPrefixStrategy {
    config: Arc<IsolationConfig>,
    clock: Arc<dyn ClockSource>,
}

impl KeyPrefixStrategy {
    #[must_use]
    pub fn new(config: Arc<IsolationConfig>, clock: Arc<dyn ClockSource>) -> Self {
        Self { config, clock }
    }

    #[must_use]
    pub fn config(&self) -> &IsolationConfig {
        &self.config
    }

    fn isolated_at(&self) -> Value {
        Value::String(
            self.clock
                .now()
                .to_rfc3339_opts(SecondsFormat::Millis, true),
        )
    }
}

impl IsolationStrategy for KeyPrefixStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::KeyPrefix
    }

    fn tenant_key(&self, key: &str, tenant_id: &str) -> String {
        format!("{}{tenant_id}:{key}", self.config.key_prefix)
    }

    fn tenant_namespace(&self, tenant_id: &str) -> String {
        format!("{}{tenant_id}", self.config.namespace_prefix)
    }

    fn isolate_data(&self, data: &Value, tenant_id: &str) -> Value {
        let mut tags = Map::with_capacity(2);
        tags.insert(TENANT_FIELD.to_string(), Value::String(tenant_id.to_string()));
        tags.insert(ISOLATED_AT_FIELD.to_string(), self.isolated_at());
        envelope::seal(data, tags)
    }

    fn extract_tenant_data(&self, data: &Value, tenant_id: &str) -> Result<Value, IsolationError> {
        let found = envelope::tag(data, TENANT_FIELD)?;
        if found == Some(tenant_id) {
            Ok(envelope::open(data))
        } else {
            tracing::warn!(
                expected = tenant_id,
                found = ?found,
                "tenant envelope mismatch"
            );
            Err(IsolationError::IsolationMismatch {
                expected: tenant_id.to_string(),
                found: found.map(str::to_owned),
            })
        }
    }

    fn isolation_key(&self, key: &str, ctx: &MultiLevelContext) -> Result<String, IsolationError> {
        let segments = scoped_segments(ctx, &self.config)?;
        let mut out = String::with_capacity(
            self.config.multi_level_prefix.len()
                + segments
                    .iter()
                    .map(|s| s.level.label().len() + s.id.len() + 2)
                    .sum::<usize>()
                + key.len(),
        );
        out.push_str(&self.config.multi_level_prefix);
        for segment in &segments {
            out.push_str(segment.level.label());
            out.push(':');
            out.push_str(segment.id);
            out.push(':');
        }
        out.push_str(key);
        enforce_max_length(out, self.config.max_key_length)
    }

    fn isolation_namespace(&self, ctx: &MultiLevelContext) -> Result<String, IsolationError> {
        let segments = scoped_segments(ctx, &self.config)?;
        let mut out = self.tenant_namespace(ctx.tenant_id());
        for segment in segments.iter().skip(1) {
            out.push(':');
            out.push_str(segment.level.label());
            out.push('_');
            out.push_str(segment.id);
        }
        enforce_max_length(out, self.config.max_key_length)
    }

    fn isolate_multi_level(
        &self,
        data: &Value,
        ctx: &MultiLevelContext,
    ) -> Result<Value, IsolationError> {
        let segments = scoped_segments(ctx, &self.config)?;
        let mut tags = Map::with_capacity(segments.len() + 2);
        for segment in &segments {
            tags.insert(
                envelope::level_field(segment.level).to_string(),
                Value::String(segment.id.to_string()),
            );
        }
        tags.insert(
            LEVEL_FIELD.to_string(),
            Value::String(ctx.isolation_level.as_str().to_string()),
        );
        tags.insert(ISOLATED_AT_FIELD.to_string(), self.isolated_at());
        Ok(envelope::seal(data, tags))
    }

    fn extract_data(&self, data: &Value, ctx: &MultiLevelContext) -> Result<Value, IsolationError> {
        envelope::check_hierarchy_tags(data, ctx)?;
        Ok(envelope::open(data))
    }
}
