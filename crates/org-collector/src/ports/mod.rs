//! Ports: the traits at the seams of the collector.

pub mod inbound;
pub mod outbound;

pub use inbound::{ClaimsSource, MessageSource};
pub use outbound::{
    HttpTransport, ManualTimeSource, MessageWriter, SystemTimeSource, TimeSource,
    TokenIntrospector,
};
