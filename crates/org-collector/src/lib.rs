//! Org Collector - tenant-scoped HTTP ingress and self-authenticating HTTP egress.
//!
//! Agents push JSON documents over HTTP. Each request is authorized by OAuth2
//! token introspection, checked against the tenant named in its
//! `Organization` header, and handed synchronously to a consumer; the agent
//! gets its answer only once the consumer acks. On the way out, messages are
//! posted downstream with a machine credential that refreshes itself.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        INGRESS BRIDGE                                │
//! │                                                                      │
//! │  POST {path}                                                         │
//! │     │                                                                │
//! │  ┌──┴───────────────────────────────────────────────┐                │
//! │  │  Recovery → Tracing → Timeout → FilterChain       │                │
//! │  │        Introspection (TTL cache) → Tenant          │                │
//! │  └──┬───────────────────────────────────────────────┘                │
//! │     │ body + Organization                                            │
//! │  ┌──┴──────────────────────┐                                         │
//! │  │   Hand-off queue         │  submit() blocks until ack             │
//! │  │   (mpsc + oneshot ack)   │                                        │
//! │  └──┬──────────────────────┘                                         │
//! └─────┼────────────────────────────────────────────────────────────────┘
//!       │ pull() / ack()
//! ┌─────┴──────────────┐
//! │       Relay         │  bounded in-flight writes
//! └─────┬──────────────┘
//!       │ write()
//! ┌─────┴────────────────────────────────────────────────────────────────┐
//! │  EgressClient → CredentialTransport (m2m exchange, single-flight)    │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use org_collector::{relay, CollectorConfig, EgressClient, IngressBridge};
//!
//! let config = CollectorConfig::load("org-collector.toml")?;
//! let bridge = Arc::new(IngressBridge::from_config(config.input.clone())?);
//! let egress = Arc::new(EgressClient::from_config(&config.output)?);
//! bridge.start().await?;
//! relay::run(bridge, egress, config.pipeline.max_in_flight, shutdown).await?;
//! ```

#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod adapters;
pub mod domain;
pub mod egress;
pub mod middleware;
pub mod ports;
pub mod relay;
pub mod service;

// Re-exports for public API
pub use adapters::{AckHandle, BridgeStats, CacheStats, CredentialTransport, TokenCache};
pub use domain::config::{CollectorConfig, InputConfig, OutputConfig};
pub use domain::error::{AckError, AuthError, BridgeError, ClaimsError, EgressError, RejectReason};
pub use domain::message::{Message, ORGANIZATION_KEY};
pub use egress::EgressClient;
pub use ports::{ClaimsSource, HttpTransport, MessageSource, MessageWriter, TimeSource};
pub use relay::RelayError;
pub use service::{BridgeState, IngressBridge};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
