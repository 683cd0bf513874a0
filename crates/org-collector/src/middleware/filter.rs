//! Request filter chain.
//!
//! Filters run in order over the request head. Each one either lets the
//! request continue (possibly attaching data to its extensions) or rejects it
//! with a [`RejectReason`]; the first rejection becomes the response and the
//! remaining filters and the handler never run.

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{request::Parts, Request},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::task::{Context, Poll};
use tower::{Layer, Service};
use tracing::warn;

use crate::domain::RejectReason;

/// One step of the ingress filter chain
#[async_trait]
pub trait RequestFilter: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    async fn apply(&self, parts: &mut Parts) -> Result<(), RejectReason>;
}

/// Layer driving an ordered list of filters in front of the handler
#[derive(Clone)]
pub struct FilterChainLayer {
    filters: Arc<[Arc<dyn RequestFilter>]>,
}

impl FilterChainLayer {
    pub fn new(filters: Vec<Arc<dyn RequestFilter>>) -> Self {
        Self {
            filters: filters.into(),
        }
    }
}

impl<S> Layer<S> for FilterChainLayer {
    type Service = FilterChainService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        FilterChainService {
            inner,
            filters: Arc::clone(&self.filters),
        }
    }
}

/// Filter chain service
#[derive(Clone)]
pub struct FilterChainService<S> {
    inner: S,
    filters: Arc<[Arc<dyn RequestFilter>]>,
}

impl<S> Service<Request<Body>> for FilterChainService<S>
where
    S: Service<Request<Body>, Response = Response> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let filters = Arc::clone(&self.filters);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let (mut parts, body) = req.into_parts();

            for filter in filters.iter() {
                if let Err(reason) = filter.apply(&mut parts).await {
                    warn!(
                        filter = filter.name(),
                        status = reason.status().as_u16(),
                        reason = %reason,
                        "Request rejected"
                    );
                    return Ok(reason.into_response());
                }
            }

            inner.call(Request::from_parts(parts, body)).await
        })
    }
}
