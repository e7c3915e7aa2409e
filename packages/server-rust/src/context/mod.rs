//! Request-scoped context: the task-local store and the tenant context
//! manager built on top of it.

pub mod manager;
pub mod store;

pub use manager::{keys, TenantContextManager};
pub use store::{ContextEntries, ContextHandle, RequestContextStore};
