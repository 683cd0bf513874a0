//! Machine-to-machine credential transport.
//!
//! Wraps an inner [`HttpTransport`] and stamps every outgoing request with a
//! bearer credential obtained from the authority. The credential is refreshed
//! on demand when it is missing, carries no expiry, or expires within the
//! configured margin. Refreshes are single-flight: concurrent senders queue on
//! the credential lock and reuse the token the first one fetched.

use async_trait::async_trait;
use axum::http::{header, HeaderValue, Method};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::domain::{decode_unverified, ConfigError, EgressError};
use crate::ports::{HttpTransport, TimeSource};

/// Exchange strategy understood by the authority
const M2M_STRATEGY: &str = "m2m";

/// Claims read from the issued credential. Only the expiry matters here.
#[derive(Debug, Clone, Default, Deserialize)]
struct CredentialClaims {
    #[serde(default, deserialize_with = "numeric_date")]
    exp: Option<u64>,
}

/// NumericDate may be fractional; whole seconds are enough here
fn numeric_date<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let seconds = Option::<f64>::deserialize(deserializer)?;
    Ok(seconds.map(|s| s.max(0.0).floor() as u64))
}

#[derive(Debug, Deserialize)]
struct ExchangeEnvelope {
    data: ExchangeData,
}

#[derive(Debug, Deserialize)]
struct ExchangeData {
    jwt: String,
}

/// Currently held credential
#[derive(Debug, Clone, Default)]
struct Credential {
    token: String,
    claims: CredentialClaims,
}

impl Credential {
    /// Usable at `now` if it does not expire within `margin`
    fn is_fresh(&self, now_secs: u64, margin: Duration) -> bool {
        if self.token.is_empty() {
            return false;
        }
        match self.claims.exp {
            Some(exp) => now_secs.saturating_add(margin.as_secs()) <= exp,
            None => false,
        }
    }
}

/// Credential-injecting decorator around an [`HttpTransport`]
pub struct CredentialTransport<T> {
    inner: T,
    auth_url: reqwest::Url,
    secret: String,
    margin: Duration,
    clock: Arc<dyn TimeSource>,
    credential: Mutex<Credential>,
    refreshes: AtomicU64,
}

impl<T: HttpTransport> CredentialTransport<T> {
    pub fn new(
        inner: T,
        auth_url: &str,
        secret: impl Into<String>,
        margin: Duration,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        let auth_url = reqwest::Url::parse(auth_url)
            .map_err(|e| ConfigError::Invalid(format!("output.auth.url: {}", e)))?;

        Ok(Self {
            inner,
            auth_url,
            secret: secret.into(),
            margin,
            clock,
            credential: Mutex::new(Credential::default()),
            refreshes: AtomicU64::new(0),
        })
    }

    /// Return a credential that stays valid for at least the margin,
    /// exchanging the secret for a new one when needed.
    pub async fn valid_token(&self) -> Result<String, EgressError> {
        let mut credential = self.credential.lock().await;

        if !credential.is_fresh(self.clock.now_secs(), self.margin) {
            debug!(expires_at = ?credential.claims.exp, "Credential missing or expiring, refreshing");
            *credential = self.exchange().await.map_err(|e| {
                warn!(error = %e, "Credential refresh failed");
                e
            })?;
            self.refreshes.fetch_add(1, Ordering::Relaxed);
            info!(expires_at = ?credential.claims.exp, "Credential refreshed");
        }

        Ok(credential.token.clone())
    }

    /// Credential exchanges performed so far
    pub fn refreshes(&self) -> u64 {
        self.refreshes.load(Ordering::Relaxed)
    }

    async fn exchange(&self) -> Result<Credential, EgressError> {
        let body = serde_json::json!({
            "strategy": M2M_STRATEGY,
            "token": self.secret,
        });

        let mut request = reqwest::Request::new(Method::POST, self.auth_url.clone());
        request.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        *request.body_mut() = Some(reqwest::Body::from(body.to_string()));

        let response = self
            .inner
            .execute(request)
            .await
            .map_err(|e| EgressError::CredentialRefresh(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(EgressError::CredentialRefresh(format!(
                "unexpected status code {} when trying to get token",
                status.as_u16()
            )));
        }

        let envelope: ExchangeEnvelope = response
            .json()
            .await
            .map_err(|e| EgressError::CredentialRefresh(format!("invalid token response: {}", e)))?;

        let claims: CredentialClaims = decode_unverified(&envelope.data.jwt)
            .map_err(|e| EgressError::CredentialRefresh(e.to_string()))?;

        Ok(Credential {
            token: envelope.data.jwt,
            claims,
        })
    }
}

#[async_trait]
impl<T: HttpTransport> HttpTransport for CredentialTransport<T> {
    async fn execute(&self, mut request: reqwest::Request) -> Result<reqwest::Response, EgressError> {
        let token = self.valid_token().await?;

        let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|e| {
            EgressError::InvalidHeader {
                name: header::AUTHORIZATION.to_string(),
                reason: e.to_string(),
            }
        })?;
        request.headers_mut().insert(header::AUTHORIZATION, value);

        let response = self.inner.execute(request).await?;
        let status = response.status();
        if !status.is_success() {
            return Err(EgressError::UnexpectedStatus(status.as_u16()));
        }

        Ok(response)
    }
}
