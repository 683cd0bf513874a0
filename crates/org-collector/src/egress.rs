//! Egress client - forwards messages to the downstream collector.
//!
//! Each message becomes one `POST` to the configured URL. Metadata entries are
//! copied into request headers, then `Content-Type` and the configured
//! `Organization` are set, overriding whatever the metadata carried. The
//! credential transport underneath stamps the bearer token.

use async_trait::async_trait;
use axum::http::{header, HeaderName, HeaderValue, Method};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::adapters::CredentialTransport;
use crate::domain::{ConfigError, EgressError, Message, OutputConfig, ORGANIZATION_KEY};
use crate::ports::{HttpTransport, MessageWriter, SystemTimeSource, TimeSource};

/// Downstream writer posting each message as JSON
pub struct EgressClient {
    transport: Arc<dyn HttpTransport>,
    url: reqwest::Url,
    organization: HeaderValue,
}

impl EgressClient {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        url: &str,
        organization: &str,
    ) -> Result<Self, ConfigError> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| ConfigError::Invalid(format!("output.url: {}", e)))?;
        let organization = HeaderValue::from_str(organization)
            .map_err(|e| ConfigError::Invalid(format!("output.organization: {}", e)))?;

        Ok(Self {
            transport,
            url,
            organization,
        })
    }

    /// Build the client, its TLS settings and the credential transport from config
    pub fn from_config(config: &OutputConfig) -> Result<Self, ConfigError> {
        Self::from_config_with_clock(config, Arc::new(SystemTimeSource))
    }

    pub fn from_config_with_clock(
        config: &OutputConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        if config.tls.skip_cert_verify {
            warn!("TLS certificate verification disabled for output");
        }
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.tls.skip_cert_verify)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("output http client: {}", e)))?;

        let transport = CredentialTransport::new(
            client,
            &config.auth.url,
            config.auth.token.clone(),
            config.auth.refresh_margin,
            clock,
        )?;

        Self::new(Arc::new(transport), &config.url, &config.organization)
    }

    fn build_request(&self, message: &Message) -> Result<reqwest::Request, EgressError> {
        let mut request = reqwest::Request::new(Method::POST, self.url.clone());
        let headers = request.headers_mut();

        for (key, value) in message.meta_iter() {
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|e| {
                EgressError::InvalidHeader {
                    name: key.to_string(),
                    reason: e.to_string(),
                }
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| EgressError::InvalidHeader {
                name: key.to_string(),
                reason: e.to_string(),
            })?;
            headers.insert(name, value);
        }

        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            HeaderName::from_static("organization"),
            self.organization.clone(),
        );

        *request.body_mut() = Some(reqwest::Body::from(message.payload().clone()));
        Ok(request)
    }
}

#[async_trait]
impl MessageWriter for EgressClient {
    async fn write(&self, message: &Message) -> Result<(), EgressError> {
        let request = self.build_request(message)?;
        let response = self.transport.execute(request).await?;
        debug!(
            status = response.status().as_u16(),
            source_organization = ?message.meta_get(ORGANIZATION_KEY),
            bytes = message.payload().len(),
            "Message forwarded"
        );
        Ok(())
    }
}
