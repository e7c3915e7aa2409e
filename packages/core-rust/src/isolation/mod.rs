//! Isolation strategies: derive storage keys and namespaces from a tenant
//! context, and wrap/unwrap payloads in tenant-tagged envelopes.
//!
//! - [`key_prefix`]: encodes the hierarchy as a key prefix (`multi:tenant:t:org:o:...:key`)
//! - [`namespace`]: encodes the hierarchy as a namespace the key is appended to
//! - [`envelope`]: reserved-field envelope shared by both strategies
//!
//! Database-per-tenant, schema-per-tenant and application-level isolation are
//! named in [`StrategyKind`] but have no implementation; [`build_strategy`]
//! rejects them with [`IsolationError::UnsupportedStrategy`].

pub mod envelope;
pub mod key_prefix;
pub mod namespace;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::clock::ClockSource;
use crate::config::IsolationConfig;
use crate::context::{IsolationLevel, MultiLevelContext};
use crate::error::{ConfigError, IsolationError};
use crate::hierarchy;
use crate::ids;

pub use key_prefix::KeyPrefixStrategy;
pub use namespace::NamespaceStrategy;

/// Selector for the isolation strategy implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum StrategyKind {
    #[default]
    #[serde(rename = "key-prefix")]
    KeyPrefix,
    #[serde(rename = "namespace")]
    Namespace,
    #[serde(rename = "database")]
    DatabasePerTenant,
    #[serde(rename = "schema")]
    SchemaPerTenant,
    #[serde(rename = "application-level")]
    ApplicationLevel,
}

impl StrategyKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::KeyPrefix => "key-prefix",
            Self::Namespace => "namespace",
            Self::DatabasePerTenant => "database",
            Self::SchemaPerTenant => "schema",
            Self::ApplicationLevel => "application-level",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "key-prefix" => Ok(Self::KeyPrefix),
            "namespace" => Ok(Self::Namespace),
            "database" => Ok(Self::DatabasePerTenant),
            "schema" => Ok(Self::SchemaPerTenant),
            "application-level" => Ok(Self::ApplicationLevel),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Pure derivation of isolation keys, namespaces and envelopes.
///
/// Single-level operations take a bare tenant id; multi-level operations take
/// a [`MultiLevelContext`] and include one segment per level up to and
/// including `ctx.isolation_level`. Implementations hold no per-request state
/// and are shared across requests as `Arc<dyn IsolationStrategy>`.
pub trait IsolationStrategy: Send + Sync + fmt::Debug {
    /// Which variant this is.
    fn kind(&self) -> StrategyKind;

    /// Storage key for `key` owned by `tenant_id`.
    fn tenant_key(&self, key: &str, tenant_id: &str) -> String;

    /// Namespace identifier for `tenant_id`.
    fn tenant_namespace(&self, tenant_id: &str) -> String;

    /// Returns a new value tagged with `tenant_id`. The input is not modified.
    fn isolate_data(&self, data: &Value, tenant_id: &str) -> Value;

    /// Strips the tenant tag after checking it matches `tenant_id`.
    ///
    /// # Errors
    ///
    /// [`IsolationError::IsolationMismatch`] when the envelope belongs to another tenant.
    fn extract_tenant_data(&self, data: &Value, tenant_id: &str) -> Result<Value, IsolationError>;

    /// Whether data for `tenant_id` needs isolation at all.
    fn should_isolate(&self, tenant_id: &str) -> bool {
        !ids::is_reserved_tenant(tenant_id)
    }

    /// Multi-level storage key for `key`.
    ///
    /// # Errors
    ///
    /// [`IsolationError::KeyTooLong`] past the configured maximum, or
    /// [`IsolationError::HierarchyViolation`] when hierarchy validation is on.
    fn isolation_key(&self, key: &str, ctx: &MultiLevelContext) -> Result<String, IsolationError>;

    /// Multi-level namespace for `ctx`.
    ///
    /// # Errors
    ///
    /// As for [`IsolationStrategy::isolation_key`].
    fn isolation_namespace(&self, ctx: &MultiLevelContext) -> Result<String, IsolationError>;

    /// Returns a new value tagged with every in-scope hierarchy id of `ctx`.
    ///
    /// # Errors
    ///
    /// [`IsolationError::HierarchyViolation`] when hierarchy validation is on.
    fn isolate_multi_level(
        &self,
        data: &Value,
        ctx: &MultiLevelContext,
    ) -> Result<Value, IsolationError>;

    /// Strips hierarchy tags after checking each against `ctx`.
    ///
    /// # Errors
    ///
    /// [`IsolationError::ContextMismatch`] on the first disagreeing field.
    fn extract_data(&self, data: &Value, ctx: &MultiLevelContext) -> Result<Value, IsolationError>;

    /// Order-preserving batch of [`IsolationStrategy::isolation_key`]. The first failure aborts.
    ///
    /// # Errors
    ///
    /// The first error produced by any item.
    fn isolation_keys(
        &self,
        keys: &[&str],
        ctx: &MultiLevelContext,
    ) -> Result<Vec<String>, IsolationError> {
        keys.iter().map(|key| self.isolation_key(key, ctx)).collect()
    }

    /// Order-preserving batch of [`IsolationStrategy::isolate_multi_level`]. The first failure aborts.
    ///
    /// # Errors
    ///
    /// The first error produced by any item.
    fn isolate_data_list(
        &self,
        items: &[Value],
        ctx: &MultiLevelContext,
    ) -> Result<Vec<Value>, IsolationError> {
        items
            .iter()
            .map(|item| self.isolate_multi_level(item, ctx))
            .collect()
    }
}

/// Builds the strategy selected by `config.strategy`.
///
/// # Errors
///
/// [`IsolationError::UnsupportedStrategy`] for the variants without an implementation.
pub fn build_strategy(
    config: &IsolationConfig,
    clock: Arc<dyn ClockSource>,
) -> Result<Arc<dyn IsolationStrategy>, IsolationError> {
    let config = Arc::new(config.clone());
    match config.strategy {
        StrategyKind::KeyPrefix => Ok(Arc::new(KeyPrefixStrategy::new(config, clock))),
        StrategyKind::Namespace => Ok(Arc::new(NamespaceStrategy::new(config, clock))),
        other @ (StrategyKind::DatabasePerTenant
        | StrategyKind::SchemaPerTenant
        | StrategyKind::ApplicationLevel) => {
            Err(IsolationError::UnsupportedStrategy(other.to_string()))
        }
    }
}

/// One hierarchy segment included in a derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment<'a> {
    pub level: IsolationLevel,
    pub id: &'a str,
}

/// Collects the segments of `ctx` that participate in key derivation.
///
/// A level contributes only when it is at or above `ctx.isolation_level`,
/// enabled in `config.levels` (tenant always is), and populated. Deeper ids
/// that happen to be set on a shallower-scoped context are ignored.
///
/// # Errors
///
/// [`IsolationError::InvalidId`] when an included id breaks the id rules.
/// With `validate_hierarchy` on, a broken chain or a declared level whose id
/// is missing is a [`IsolationError::HierarchyViolation`].
pub fn scoped_segments<'a>(
    ctx: &'a MultiLevelContext,
    config: &IsolationConfig,
) -> Result<Vec<Segment<'a>>, IsolationError> {
    if config.validate_hierarchy {
        hierarchy::check_hierarchy(ctx)?;
        if ctx.id_at(ctx.isolation_level).is_none() {
            return Err(IsolationError::HierarchyViolation {
                level: ctx.isolation_level,
                reason: format!(
                    "isolation level {} declared but {} is not set",
                    ctx.isolation_level,
                    ctx.isolation_level.field_name()
                ),
            });
        }
    }

    let segments: Vec<Segment<'a>> = IsolationLevel::ALL
        .iter()
        .copied()
        .filter(|level| *level <= ctx.isolation_level)
        .filter(|level| *level == IsolationLevel::Tenant || config.levels.is_enabled(*level))
        .filter_map(|level| ctx.id_at(level).map(|id| Segment { level, id }))
        .collect();

    // Ids are joined with ':' and '_', so only the id charset keeps keys unambiguous.
    for segment in &segments {
        if let Err(err) = ids::validate_id(segment.level.field_name(), segment.id) {
            tracing::warn!(field = %err.field, reason = %err.reason, "rejecting malformed hierarchy id");
            return Err(err.into());
        }
    }
    Ok(segments)
}

/// Rejects keys longer than `max` bytes. Keys are never truncated.
pub(crate) fn enforce_max_length(key: String, max: usize) -> Result<String, IsolationError> {
    if key.len() > max {
        tracing::warn!(length = key.len(), max, "rejecting over-long isolation key");
        Err(IsolationError::KeyTooLong {
            length: key.len(),
            max,
        })
    } else {
        Ok(key)
    }
}
