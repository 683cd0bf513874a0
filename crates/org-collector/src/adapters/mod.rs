//! Adapters for the collector.
//!
//! Infrastructure implementations behind the ports: the verdict cache, remote
//! introspection, claims sources, the hand-off queue and the credential
//! transport.

pub mod cache;
pub mod claims;
pub mod credential;
pub mod error_conversions;
pub mod handoff;
pub mod introspection;

pub use cache::{cleanup_task, CacheStats, TokenCache};
pub use claims::{BearerJwtClaims, IntrospectedClaims};
pub use credential::CredentialTransport;
pub use handoff::{handoff_channel, AckHandle, BridgeStats, HandoffConsumer, HandoffProducer};
pub use introspection::{HttpIntrospector, IntrospectionAuthorizer};
