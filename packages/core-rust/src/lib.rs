//! `tenantscope` Core: tenant contexts, hierarchy validation, and isolation key strategies.
//!
//! Everything here is pure and synchronous. Request-scoped propagation,
//! metrics and HTTP integration live in `tenantscope-server`.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod hierarchy;
pub mod ids;
pub mod isolation;

pub use clock::{ClockSource, ManualClock, SystemClock};
pub use config::{ContextConfig, IsolationConfig, LevelToggles, TenantScopeConfig};
pub use context::{IsolationLevel, MultiLevelContext, TenantContext};
pub use error::{ConfigError, IsolationError, ValidationError};
pub use isolation::{build_strategy, IsolationStrategy, StrategyKind};
