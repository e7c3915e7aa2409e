//! HTTP integration: header extraction and the tower layer that opens a
//! context boundary per request.

pub mod extract;
pub mod layer;

pub use extract::{ContextExtractor, HeaderSource};
pub use layer::{TenantContextLayer, TenantContextService};
