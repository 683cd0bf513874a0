//! Outbound ports for the collector.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::domain::{AuthError, EgressError, IntrospectionVerdict, Message};

/// Time source trait for testability
pub trait TimeSource: Send + Sync {
    /// Milliseconds since the Unix epoch
    fn now_millis(&self) -> u64;

    /// Seconds since the Unix epoch
    fn now_secs(&self) -> u64 {
        self.now_millis() / 1000
    }
}

/// System time implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> u64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            // Clock before Unix epoch: report 0 rather than panic
            .unwrap_or(0)
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    millis: AtomicU64,
}

impl ManualTimeSource {
    pub fn new(start_millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(start_millis),
        }
    }

    /// Start at the given Unix time in seconds
    pub fn at_secs(secs: u64) -> Self {
        Self::new(secs * 1000)
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Remote authority that validates opaque bearer tokens
#[async_trait]
pub trait TokenIntrospector: Send + Sync {
    async fn introspect(&self, token: &str) -> Result<IntrospectionVerdict, AuthError>;
}

/// One HTTP exchange. Decorators wrap an inner transport.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, EgressError>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn execute(&self, request: reqwest::Request) -> Result<reqwest::Response, EgressError> {
        reqwest::Client::execute(self, request)
            .await
            .map_err(EgressError::from)
    }
}

/// Sink side of the pipeline
#[async_trait]
pub trait MessageWriter: Send + Sync {
    async fn connect(&self) -> Result<(), EgressError> {
        Ok(())
    }

    async fn write(&self, message: &Message) -> Result<(), EgressError>;

    async fn close(&self) -> Result<(), EgressError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_time_source() {
        let clock = ManualTimeSource::at_secs(1_000);
        assert_eq!(clock.now_secs(), 1_000);

        clock.advance(Duration::from_millis(1_500));
        assert_eq!(clock.now_millis(), 1_001_500);
        assert_eq!(clock.now_secs(), 1_001);
    }

    #[test]
    fn test_system_time_source() {
        let now = SystemTimeSource.now_secs();
        assert!(now > 1_600_000_000);
    }
}
