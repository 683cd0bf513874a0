//! Tenant check.
//!
//! The `Organization` header names the tenant a request writes into; the
//! caller's claims must list it. An absent header is answered before the
//! claims are looked at.

use async_trait::async_trait;
use axum::http::request::Parts;
use std::sync::Arc;
use tracing::debug;

use crate::domain::{RejectReason, ORGANIZATION_KEY};
use crate::middleware::filter::RequestFilter;
use crate::ports::ClaimsSource;

pub struct TenantFilter {
    claims: Arc<dyn ClaimsSource>,
}

impl TenantFilter {
    pub fn new(claims: Arc<dyn ClaimsSource>) -> Self {
        Self { claims }
    }
}

#[async_trait]
impl RequestFilter for TenantFilter {
    fn name(&self) -> &'static str {
        "tenant"
    }

    async fn apply(&self, parts: &mut Parts) -> Result<(), RejectReason> {
        let organization = parts
            .headers
            .get(ORGANIZATION_KEY)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(RejectReason::MissingTenant)?;

        let claims = self.claims.caller_claims(parts)?;
        if !claims.is_member_of(organization) {
            return Err(RejectReason::TenantMismatch {
                organization: organization.to_string(),
            });
        }

        debug!(organization, "Tenant membership confirmed");
        Ok(())
    }
}
