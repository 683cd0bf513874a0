//! Claims sources for the tenant check.

use axum::http::request::Parts;

use crate::domain::{bearer_token, decode_unverified, CallerClaims, ClaimsError, IntrospectionVerdict};
use crate::ports::ClaimsSource;

/// Decodes the bearer JWT payload without verifying its signature.
///
/// The token has already been vouched for by the introspection filter, so
/// only its payload is read here.
#[derive(Debug, Default, Clone, Copy)]
pub struct BearerJwtClaims;

impl ClaimsSource for BearerJwtClaims {
    fn caller_claims(&self, parts: &Parts) -> Result<CallerClaims, ClaimsError> {
        let token = bearer_token(&parts.headers).ok_or(ClaimsError::Missing)?;
        decode_unverified(token)
    }
}

/// Reads the claims carried by the introspection verdict attached to the request
#[derive(Debug, Default, Clone, Copy)]
pub struct IntrospectedClaims;

impl ClaimsSource for IntrospectedClaims {
    fn caller_claims(&self, parts: &Parts) -> Result<CallerClaims, ClaimsError> {
        parts
            .extensions
            .get::<IntrospectionVerdict>()
            .map(|verdict| verdict.claims.clone())
            .ok_or(ClaimsError::Missing)
    }
}
