//! Tower middleware that gives every HTTP request its own context boundary.
//!
//! The boundary is opened before the inner service is called, so both the
//! synchronous part of `call` and the returned future see the request's
//! context. The context is cleared when the inner future completes. A request
//! whose headers fail extraction or validation is logged and served with an
//! empty boundary; turning that into an access-denied response is up to the
//! handlers.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use http::Request;
use tenantscope_core::{IsolationError, MultiLevelContext};
use tower::{Layer, Service};
use tracing::{debug, field, info_span, warn, Instrument, Span};

use super::extract::ContextExtractor;
use crate::context::{ContextHandle, RequestContextStore, TenantContextManager};

// ---------------------------------------------------------------------------
// TenantContextLayer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TenantContextLayer {
    manager: Arc<TenantContextManager>,
    extractor: ContextExtractor,
}

impl TenantContextLayer {
    #[must_use]
    pub fn new(manager: Arc<TenantContextManager>, extractor: ContextExtractor) -> Self {
        Self { manager, extractor }
    }
}

impl<S> Layer<S> for TenantContextLayer {
    type Service = TenantContextService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TenantContextService {
            inner,
            manager: Arc::clone(&self.manager),
            extractor: self.extractor.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// TenantContextService
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct TenantContextService<S> {
    inner: S,
    manager: Arc<TenantContextManager>,
    extractor: ContextExtractor,
}

impl<S, B> Service<Request<B>> for TenantContextService<S>
where
    S: Service<Request<B>> + Send,
    S::Future: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<B>) -> Self::Future {
        let span = info_span!(
            "tenant_context",
            method = %req.method(),
            path = %req.uri().path(),
            tenant_id = field::Empty,
        );
        let extracted = self.extractor.extract(req.headers());
        let manager = Arc::clone(&self.manager);
        let inner = &mut self.inner;

        let fut = RequestContextStore::enter(ContextHandle::default(), || {
            let _entered = span.enter();
            install(&manager, extracted, &span);
            let response = inner.call(req);
            RequestContextStore::propagate(async move {
                let result = response.await;
                manager.clear_context();
                result
            })
        });
        Box::pin(fut.instrument(span))
    }
}

fn install(
    manager: &TenantContextManager,
    extracted: Result<Option<MultiLevelContext>, IsolationError>,
    span: &Span,
) {
    match extracted {
        Ok(Some(ctx)) => {
            let tenant_id = ctx.tenant_id().to_owned();
            match manager.set_multi_level_context(ctx) {
                Ok(()) => {
                    span.record("tenant_id", tenant_id.as_str());
                }
                Err(err) => {
                    warn!(tenant_id = %tenant_id, error = %err, "continuing without tenant context");
                }
            }
        }
        Ok(None) => debug!("request carries no tenant context"),
        Err(err) => warn!(error = %err, "continuing without tenant context"),
    }
}
