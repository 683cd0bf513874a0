//! Collector error types.
//!
//! Startup errors propagate to the caller of `start`. Per-request errors are
//! folded into a [`RejectReason`] that carries the HTTP status answered to the
//! caller; they never affect the listener or sibling requests.

use std::fmt;

use axum::http::StatusCode;

/// Ingress bridge lifecycle errors
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Listener could not be bound
    #[error("server bind error on {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// `start` called on a bridge that is already listening
    #[error("bridge already started")]
    AlreadyStarted,

    /// Every producer handle is gone; nothing more will arrive
    #[error("bridge closed")]
    Closed,
}

/// Introspection failures. All of them deny the request.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No `Authorization: Bearer ...` header on the request
    #[error("missing bearer token")]
    MissingToken,

    /// Introspection endpoint unreachable or the call was interrupted
    #[error("introspection transport error: {0}")]
    Transport(String),

    /// Introspection endpoint answered with a non-2xx status
    #[error("introspection returned unexpected status {0}")]
    UnexpectedStatus(u16),

    /// Introspection answer could not be parsed
    #[error("invalid introspection response: {0}")]
    Decode(String),

    /// Token is known to the authority but not active
    #[error("token is not active")]
    Inactive,
}

/// Caller identity token could not be read
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClaimsError {
    #[error("missing identity token")]
    Missing,

    #[error("malformed identity token: {0}")]
    Malformed(String),
}

/// Failure reported by the consumer for a specific message
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct AckError {
    message: String,
}

impl AckError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Ack handle was dropped without an outcome
    pub fn dropped() -> Self {
        Self::new("message dropped without acknowledgement")
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// Egress-side errors. Returned to the pipeline, never retried here.
#[derive(Debug, thiserror::Error)]
pub enum EgressError {
    /// Machine credential exchange failed; the current send fails with it
    #[error("credential refresh failed: {0}")]
    CredentialRefresh(String),

    /// Remote endpoint answered with a non-2xx status
    #[error("unexpected status code {0}")]
    UnexpectedStatus(u16),

    /// Connection-level failure
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Metadata entry cannot be carried as an HTTP header
    #[error("invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
}

/// Terminal per-request outcome other than success
#[derive(Debug)]
pub enum RejectReason {
    /// Request body could not be read
    BodyRead(String),
    /// Introspection denied or failed
    Auth(AuthError),
    /// Identity claims could not be decoded
    Claims(ClaimsError),
    /// `Organization` header absent
    MissingTenant,
    /// Caller is not a member of the requested tenant
    TenantMismatch { organization: String },
    /// Consumer acked with an error
    Ack(AckError),
    /// Configured request timeout elapsed
    Timeout,
    /// Bridge is shutting down; nothing will consume the message
    Unavailable,
}

impl RejectReason {
    /// HTTP status answered for this rejection
    pub fn status(&self) -> StatusCode {
        match self {
            RejectReason::BodyRead(_) | RejectReason::Ack(_) => StatusCode::BAD_REQUEST,
            RejectReason::Auth(_) | RejectReason::Claims(_) => StatusCode::UNAUTHORIZED,
            RejectReason::MissingTenant => StatusCode::PRECONDITION_FAILED,
            RejectReason::TenantMismatch { .. } => StatusCode::FORBIDDEN,
            RejectReason::Timeout => StatusCode::GATEWAY_TIMEOUT,
            RejectReason::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::BodyRead(e) => write!(f, "failed to read request body: {}", e),
            RejectReason::Auth(e) => write!(f, "unauthorized: {}", e),
            RejectReason::Claims(e) => write!(f, "unauthorized: {}", e),
            RejectReason::MissingTenant => write!(f, "missing Organization header"),
            RejectReason::TenantMismatch { organization } => {
                write!(f, "agent not allowed to access organization {}", organization)
            }
            RejectReason::Ack(e) => write!(f, "message rejected: {}", e),
            RejectReason::Timeout => write!(f, "request timed out"),
            RejectReason::Unavailable => write!(f, "collector unavailable"),
        }
    }
}

impl From<AuthError> for RejectReason {
    fn from(e: AuthError) -> Self {
        RejectReason::Auth(e)
    }
}

impl From<ClaimsError> for RejectReason {
    fn from(e: ClaimsError) -> Self {
        RejectReason::Claims(e)
    }
}

impl From<AckError> for RejectReason {
    fn from(e: AckError) -> Self {
        RejectReason::Ack(e)
    }
}
