//! Domain types for the collector.
//!
//! Pure data, configuration and errors. Network and async plumbing lives in
//! `adapters`.

pub mod claims;
pub mod config;
pub mod correlation;
pub mod error;
pub mod message;

// Re-exports for convenience
pub use claims::{bearer_token, decode_unverified, CallerClaims, IntrospectionVerdict, OrganizationClaim};
pub use config::{
    AuthConfig, CacheConfig, ClaimsSourceKind, CollectorConfig, ConfigError, InputConfig,
    OutputConfig, PipelineConfig, TlsConfig,
};
pub use correlation::CorrelationId;
pub use error::{AckError, AuthError, BridgeError, ClaimsError, EgressError, RejectReason};
pub use message::{Message, ORGANIZATION_KEY};
