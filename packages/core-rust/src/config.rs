//! Configuration types for isolation strategies and context handling.
//!
//! All structs implement `Default` and `Deserialize`; hosts load them from
//! whatever format they use and call [`TenantScopeConfig::validate`] once.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::IsolationLevel;
use crate::error::ConfigError;
use crate::isolation::StrategyKind;

/// Per-level switches for multi-level key and envelope derivation.
///
/// The tenant level cannot be disabled; `validate` rejects it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LevelToggles {
    pub tenant: bool,
    pub organization: bool,
    pub department: bool,
    pub user: bool,
}

impl Default for LevelToggles {
    fn default() -> Self {
        Self {
            tenant: true,
            organization: true,
            department: true,
            user: true,
        }
    }
}

impl LevelToggles {
    #[must_use]
    pub fn is_enabled(&self, level: IsolationLevel) -> bool {
        match level {
            IsolationLevel::Tenant => self.tenant,
            IsolationLevel::Organization => self.organization,
            IsolationLevel::Department => self.department,
            IsolationLevel::User => self.user,
        }
    }
}

/// Controls how isolation keys, namespaces and envelopes are derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Which strategy implementation to build.
    pub strategy: StrategyKind,
    /// Prefix for single-level tenant keys.
    pub key_prefix: String,
    /// Prefix for tenant namespaces.
    pub namespace_prefix: String,
    /// Prefix for multi-level isolation keys.
    pub multi_level_prefix: String,
    /// Which hierarchy levels contribute segments.
    pub levels: LevelToggles,
    /// Maximum length of a derived key in bytes. Longer keys are rejected.
    pub max_key_length: usize,
    /// Enforce the strict hierarchy chain on every multi-level operation.
    pub validate_hierarchy: bool,
    /// Capacity of the derived-key cache in front of the strategy. 0 disables it.
    pub key_cache_capacity: usize,
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::KeyPrefix,
            key_prefix: "tenant:".to_string(),
            namespace_prefix: "tenant_".to_string(),
            multi_level_prefix: "multi:".to_string(),
            levels: LevelToggles::default(),
            max_key_length: 250,
            validate_hierarchy: true,
            key_cache_capacity: 10_000,
        }
    }
}

/// Controls the request-scoped context manager.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    /// Reject `update_tenant` calls that switch to a different tenant.
    pub validate_permissions: bool,
    /// A context older than this reads as absent. `None` disables expiry.
    pub context_timeout_ms: Option<u64>,
}

impl ContextConfig {
    #[must_use]
    pub fn context_timeout(&self) -> Option<Duration> {
        self.context_timeout_ms.map(Duration::from_millis)
    }
}

/// Top-level configuration grouping every component's settings.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TenantScopeConfig {
    pub isolation: IsolationConfig,
    pub context: ContextConfig,
}

impl TenantScopeConfig {
    /// Rejects settings no component can work with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.isolation.max_key_length == 0 {
            return Err(ConfigError::InvalidValue {
                field: "isolation.max_key_length",
                reason: "must be greater than zero".to_string(),
            });
        }
        if !self.isolation.levels.tenant {
            return Err(ConfigError::InvalidValue {
                field: "isolation.levels.tenant",
                reason: "the tenant level cannot be disabled".to_string(),
            });
        }
        if self.context.context_timeout_ms == Some(0) {
            return Err(ConfigError::InvalidValue {
                field: "context.context_timeout_ms",
                reason: "use null to disable expiry instead of 0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn isolation_config_defaults() {
        let config = IsolationConfig::default();
        assert_eq!(config.strategy, StrategyKind::KeyPrefix);
        assert_eq!(config.key_prefix, "tenant:");
        assert_eq!(config.namespace_prefix, "tenant_");
        assert_eq!(config.multi_level_prefix, "multi:");
        assert_eq!(config.max_key_length, 250);
        assert!(config.validate_hierarchy);
        assert!(config.levels.is_enabled(IsolationLevel::User));
    }

    #[test]
    fn context_config_defaults_disable_expiry() {
        let config = ContextConfig::default();
        assert!(config.context_timeout().is_none());
        assert!(!config.validate_permissions);
    }

    #[test]
    fn default_config_is_valid() {
        assert!(TenantScopeConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_max_key_length_is_rejected() {
        let mut config = TenantScopeConfig::default();
        config.isolation.max_key_length = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue {
                field: "isolation.max_key_length",
                ..
            })
        ));
    }

    #[test]
    fn tenant_level_cannot_be_disabled() {
        let mut config = TenantScopeConfig::default();
        config.isolation.levels.tenant = false;
        assert!(config.validate().is_err());
    }

    #[test]
    fn deserializes_partial_json_with_defaults() {
        let config: TenantScopeConfig = serde_json::from_value(serde_json::json!({
            "isolation": { "strategy": "namespace", "levels": { "user": false } },
            "context": { "context_timeout_ms": 30000 }
        }))
        .unwrap();
        assert_eq!(config.isolation.strategy, StrategyKind::Namespace);
        assert!(!config.isolation.levels.user);
        assert!(config.isolation.levels.department);
        assert_eq!(config.isolation.key_prefix, "tenant:");
        assert_eq!(
            config.context.context_timeout(),
            Some(Duration::from_secs(30))
        );
    }
}
