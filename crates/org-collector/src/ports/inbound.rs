//! Inbound ports for the ingress bridge.

use async_trait::async_trait;
use axum::http::request::Parts;

use crate::adapters::AckHandle;
use crate::domain::{BridgeError, CallerClaims, ClaimsError, Message};

/// Resolves the claims of the caller of an ingress request.
///
/// Implementations may decode the bearer credential directly or reuse what
/// an earlier filter attached to the request extensions; the tenant filter
/// does not care which.
pub trait ClaimsSource: Send + Sync {
    fn caller_claims(&self, parts: &Parts) -> Result<CallerClaims, ClaimsError>;
}

/// Consumer side of the ingress bridge.
///
/// Every pulled message must be answered through its [`AckHandle`]; the
/// original HTTP caller is blocked until then.
#[async_trait]
pub trait MessageSource: Send + Sync {
    async fn pull(&self) -> Result<(Message, AckHandle), BridgeError>;
}
