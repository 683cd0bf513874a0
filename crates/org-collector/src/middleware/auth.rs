//! Introspection filter.
//!
//! Validates the bearer token against the authorization server (through the
//! verdict cache) and attaches the verdict to the request extensions for the
//! filters behind it.

use async_trait::async_trait;
use axum::http::request::Parts;
use std::sync::Arc;
use tracing::debug;

use crate::adapters::IntrospectionAuthorizer;
use crate::domain::{bearer_token, AuthError, RejectReason};
use crate::middleware::filter::RequestFilter;

pub struct IntrospectionFilter {
    authorizer: Arc<IntrospectionAuthorizer>,
}

impl IntrospectionFilter {
    pub fn new(authorizer: Arc<IntrospectionAuthorizer>) -> Self {
        Self { authorizer }
    }
}

#[async_trait]
impl RequestFilter for IntrospectionFilter {
    fn name(&self) -> &'static str {
        "introspection"
    }

    async fn apply(&self, parts: &mut Parts) -> Result<(), RejectReason> {
        let token = bearer_token(&parts.headers).ok_or(AuthError::MissingToken)?;

        let verdict = self.authorizer.authorize(token).await?;
        if !verdict.active {
            return Err(AuthError::Inactive.into());
        }

        debug!(sub = ?verdict.claims.sub, "Token active");
        parts.extensions.insert(verdict);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::TokenCache;
    use crate::domain::{CacheConfig, IntrospectionVerdict};
    use crate::ports::{ManualTimeSource, TokenIntrospector};
    use axum::http::Request;

    struct ByPrefix;

    #[async_trait]
    impl TokenIntrospector for ByPrefix {
        async fn introspect(&self, token: &str) -> Result<IntrospectionVerdict, AuthError> {
            match token {
                t if t.starts_with("active") => Ok(IntrospectionVerdict {
                    active: true,
                    ..Default::default()
                }),
                t if t.starts_with("down") => Err(AuthError::Transport("connection refused".into())),
                _ => Ok(IntrospectionVerdict::default()),
            }
        }
    }

    fn filter() -> IntrospectionFilter {
        let cache = Arc::new(TokenCache::new(
            &CacheConfig::default(),
            Arc::new(ManualTimeSource::at_secs(1_000)),
        ));
        IntrospectionFilter::new(Arc::new(IntrospectionAuthorizer::new(Arc::new(ByPrefix), cache)))
    }

    fn parts(auth: Option<&str>) -> Parts {
        let mut builder = Request::builder().method("POST").uri("/");
        if let Some(auth) = auth {
            builder = builder.header("Authorization", auth);
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[tokio::test]
    async fn test_active_token_attaches_verdict() {
        let mut parts = parts(Some("Bearer active-1"));
        filter().apply(&mut parts).await.unwrap();
        assert!(parts.extensions.get::<IntrospectionVerdict>().unwrap().active);
    }

    #[tokio::test]
    async fn test_missing_inactive_and_failing_tokens() {
        let filter = filter();

        for auth in [None, Some("Bearer revoked"), Some("Bearer down-1"), Some("Basic abc")] {
            let mut parts = parts(auth);
            let reason = filter.apply(&mut parts).await.unwrap_err();
            assert!(matches!(reason, RejectReason::Auth(_)), "{:?}", auth);
            assert!(parts.extensions.get::<IntrospectionVerdict>().is_none());
        }
    }
}
