//! `tenantscope` Server: request-scoped tenant context propagation, the
//! instrumented isolation service, and tower middleware for HTTP hosts.

pub mod context;
pub mod error;
pub mod isolation;
pub mod middleware;
pub mod module;
pub mod telemetry;

pub use context::{RequestContextStore, TenantContextManager};
pub use error::{ContextError, SetupError};
pub use isolation::{IsolationMetrics, IsolationService, LevelStats};
pub use middleware::{ContextExtractor, HeaderSource, TenantContextLayer};
pub use module::TenantScope;
