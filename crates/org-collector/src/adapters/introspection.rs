//! OAuth2 token introspection (RFC 7662) with a verdict cache.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::cache::TokenCache;
use crate::domain::{AuthError, IntrospectionVerdict};
use crate::ports::TokenIntrospector;

/// Every verdict costs the same in the cache budget
const VERDICT_COST: u64 = 1;

/// Introspection client calling a remote endpoint over HTTP
#[derive(Clone)]
pub struct HttpIntrospector {
    client: reqwest::Client,
    url: String,
}

impl HttpIntrospector {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl TokenIntrospector for HttpIntrospector {
    async fn introspect(&self, token: &str) -> Result<IntrospectionVerdict, AuthError> {
        let response = self
            .client
            .post(&self.url)
            .form(&[("token", token)])
            .send()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::UnexpectedStatus(status.as_u16()));
        }

        response
            .json::<IntrospectionVerdict>()
            .await
            .map_err(|e| AuthError::Decode(e.to_string()))
    }
}

/// Caches introspection verdicts keyed by the raw bearer token.
///
/// A cached verdict is served for the whole cache TTL, so the freshness bound
/// is the TTL rather than real-time validity. Cancelling the returned future
/// aborts the remote call.
pub struct IntrospectionAuthorizer {
    introspector: Arc<dyn TokenIntrospector>,
    cache: Arc<TokenCache<IntrospectionVerdict>>,
    remote_calls: AtomicU64,
}

impl IntrospectionAuthorizer {
    pub fn new(
        introspector: Arc<dyn TokenIntrospector>,
        cache: Arc<TokenCache<IntrospectionVerdict>>,
    ) -> Self {
        Self {
            introspector,
            cache,
            remote_calls: AtomicU64::new(0),
        }
    }

    /// Resolve the verdict for `token`, from cache when possible
    pub async fn authorize(&self, token: &str) -> Result<IntrospectionVerdict, AuthError> {
        if let Some(verdict) = self.cache.get(token) {
            debug!(active = verdict.active, "Introspection cache hit");
            return Ok(verdict);
        }

        self.remote_calls.fetch_add(1, Ordering::Relaxed);
        let verdict = self.introspector.introspect(token).await.map_err(|e| {
            warn!(error = %e, "Token introspection failed");
            e
        })?;

        if !self.cache.set(token, verdict.clone(), VERDICT_COST) {
            debug!("Introspection verdict not admitted to cache");
        }

        Ok(verdict)
    }

    /// Remote introspection calls issued so far
    pub fn remote_calls(&self) -> u64 {
        self.remote_calls.load(Ordering::Relaxed)
    }

    pub fn cache(&self) -> &Arc<TokenCache<IntrospectionVerdict>> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::CacheConfig;
    use crate::domain::{CallerClaims, OrganizationClaim};
    use crate::ports::ManualTimeSource;
    use parking_lot::Mutex;
    use std::time::Duration;

    /// Scripted introspector recording every token it sees
    struct ScriptedIntrospector {
        seen: Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl TokenIntrospector for ScriptedIntrospector {
        async fn introspect(&self, token: &str) -> Result<IntrospectionVerdict, AuthError> {
            self.seen.lock().push(token.to_string());
            if self.fail {
                return Err(AuthError::UnexpectedStatus(500));
            }
            Ok(IntrospectionVerdict {
                active: token.starts_with("good"),
                claims: CallerClaims {
                    organizations: vec![OrganizationClaim { id: "org1".into() }],
                    ..Default::default()
                },
            })
        }
    }

    fn authorizer(fail: bool) -> (IntrospectionAuthorizer, Arc<ScriptedIntrospector>, Arc<ManualTimeSource>) {
        let clock = Arc::new(ManualTimeSource::at_secs(1_000));
        let config = CacheConfig {
            ttl: Duration::from_secs(60),
            ..Default::default()
        };
        let cache = Arc::new(TokenCache::new(&config, clock.clone()));
        let introspector = Arc::new(ScriptedIntrospector {
            seen: Mutex::new(Vec::new()),
            fail,
        });
        (
            IntrospectionAuthorizer::new(introspector.clone(), cache),
            introspector,
            clock,
        )
    }

    #[tokio::test]
    async fn test_second_call_within_ttl_is_cached() {
        let (authorizer, introspector, clock) = authorizer(false);

        let first = authorizer.authorize("good-token").await.unwrap();
        clock.advance(Duration::from_secs(59));
        let second = authorizer.authorize("good-token").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(introspector.seen.lock().len(), 1);
        assert_eq!(authorizer.remote_calls(), 1);
    }

    #[tokio::test]
    async fn test_call_after_ttl_goes_remote() {
        let (authorizer, introspector, clock) = authorizer(false);

        authorizer.authorize("good-token").await.unwrap();
        clock.advance(Duration::from_secs(61));
        authorizer.authorize("good-token").await.unwrap();

        assert_eq!(introspector.seen.lock().len(), 2);
    }

    #[tokio::test]
    async fn test_inactive_verdicts_are_cached_too() {
        let (authorizer, introspector, _) = authorizer(false);

        assert!(!authorizer.authorize("revoked").await.unwrap().active);
        assert!(!authorizer.authorize("revoked").await.unwrap().active);
        assert_eq!(introspector.seen.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        let (authorizer, introspector, _) = authorizer(true);

        assert!(matches!(
            authorizer.authorize("good-token").await,
            Err(AuthError::UnexpectedStatus(500))
        ));
        assert!(authorizer.authorize("good-token").await.is_err());
        assert_eq!(introspector.seen.lock().len(), 2);
        assert!(authorizer.cache().is_empty());
    }
}
