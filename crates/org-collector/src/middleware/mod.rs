//! Middleware stack for the ingress bridge.
//!
//! Layer order: Request → Recovery → Tracing → Timeout → FilterChain(Introspection → Tenant) → Handler
//!
//! Recovery and tracing wrap every request. Timeout and the filter chain only
//! wrap the collect route, so unknown paths are answered without touching the
//! authorization server.

pub mod auth;
pub mod filter;
pub mod recovery;
pub mod tenant;
pub mod timeout;
pub mod tracing;

pub use auth::IntrospectionFilter;
pub use filter::{FilterChainLayer, RequestFilter};
pub use recovery::recovery_layer;
pub use tenant::TenantFilter;
pub use timeout::TimeoutLayer;
pub use self::tracing::TracingLayer;

use std::sync::Arc;

use crate::adapters::IntrospectionAuthorizer;
use crate::domain::InputConfig;
use crate::ports::ClaimsSource;

/// Middleware stack builder
pub struct MiddlewareStack {
    pub tracing: TracingLayer,
    pub timeout: TimeoutLayer,
    pub filters: FilterChainLayer,
}

impl MiddlewareStack {
    /// Assemble the stack for one input
    pub fn new(
        config: &InputConfig,
        authorizer: Arc<IntrospectionAuthorizer>,
        claims: Arc<dyn ClaimsSource>,
    ) -> Self {
        let filters: Vec<Arc<dyn RequestFilter>> = vec![
            Arc::new(IntrospectionFilter::new(authorizer)),
            Arc::new(TenantFilter::new(claims)),
        ];

        Self {
            tracing: TracingLayer::new(),
            timeout: TimeoutLayer::new(config.request_timeout),
            filters: FilterChainLayer::new(filters),
        }
    }
}
