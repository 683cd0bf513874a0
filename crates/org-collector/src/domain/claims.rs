//! Caller claims, introspection verdicts and unverified JWT decoding.

use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::error::ClaimsError;

/// A tenant membership carried in the caller's claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrganizationClaim {
    pub id: String,
}

/// Claims describing the caller of the ingress endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerClaims {
    #[serde(default)]
    pub organizations: Vec<OrganizationClaim>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    /// Expiry, seconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
}

impl CallerClaims {
    /// Whether the caller is a member of `organization`
    pub fn is_member_of(&self, organization: &str) -> bool {
        self.organizations.iter().any(|o| o.id == organization)
    }
}

/// Result of validating an opaque token against the introspection endpoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionVerdict {
    pub active: bool,
    #[serde(flatten)]
    pub claims: CallerClaims,
}

impl IntrospectionVerdict {
    /// Expiry reported by the authority, if any
    pub fn expires_at(&self) -> Option<u64> {
        self.claims.exp
    }
}

/// Bearer credential from the `Authorization` header
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}

/// Decode the payload segment of a JWT without checking its signature.
///
/// Only for tokens whose issuer is trusted through the transport.
pub fn decode_unverified<T: DeserializeOwned>(token: &str) -> Result<T, ClaimsError> {
    let mut segments = token.split('.');
    let payload = match (segments.next(), segments.next(), segments.next(), segments.next()) {
        (Some(_), Some(payload), Some(_), None) => payload,
        _ => {
            return Err(ClaimsError::Malformed(
                "expected three dot-separated segments".into(),
            ))
        }
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| ClaimsError::Malformed(format!("invalid base64 payload: {}", e)))?;

    serde_json::from_slice(&bytes)
        .map_err(|e| ClaimsError::Malformed(format!("invalid claims json: {}", e)))
}

/// Build an unsigned JWT around `claims`. Test helper for stub authorities.
#[cfg(test)]
pub(crate) fn unsigned_jwt(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}
