//! Ingress bridge service - HTTP input of the collector.
//!
//! Accepts `POST` requests on the configured path, runs them through the
//! middleware stack and hands each accepted body to the consumer, answering
//! the caller only once the consumer acks.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tower::ServiceBuilder;
use tracing::{error, info, warn};

use crate::adapters::{
    cleanup_task, handoff_channel, AckHandle, BearerJwtClaims, BridgeStats, HandoffConsumer,
    HandoffProducer, HttpIntrospector, IntrospectedClaims, IntrospectionAuthorizer, TokenCache,
};
use crate::domain::{
    BridgeError, ClaimsSourceKind, ConfigError, CorrelationId, InputConfig, Message, RejectReason,
    ORGANIZATION_KEY,
};
use crate::middleware::{recovery_layer, MiddlewareStack};
use crate::ports::{ClaimsSource, MessageSource, SystemTimeSource, TimeSource, TokenIntrospector};

/// Floor for the cache purge interval
const MIN_PURGE_INTERVAL: Duration = Duration::from_secs(1);

/// Lifecycle of the bridge. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Listening,
    Closed,
}

struct Lifecycle {
    state: BridgeState,
    /// Moved into the router on start, dropped on stop
    producer: Option<HandoffProducer>,
    local_addr: Option<SocketAddr>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server: Option<JoinHandle<()>>,
    cleanup: Option<JoinHandle<()>>,
}

/// Shared state for the collect handler
#[derive(Clone)]
struct IngressState {
    producer: HandoffProducer,
    max_body_size: usize,
}

/// HTTP ingress bridge
pub struct IngressBridge {
    config: InputConfig,
    authorizer: Arc<IntrospectionAuthorizer>,
    claims: Arc<dyn ClaimsSource>,
    consumer: HandoffConsumer,
    lifecycle: Mutex<Lifecycle>,
}

impl IngressBridge {
    /// Create a bridge around an introspector and clock
    pub fn new(
        config: InputConfig,
        introspector: Arc<dyn TokenIntrospector>,
        clock: Arc<dyn TimeSource>,
    ) -> Self {
        let cache = Arc::new(TokenCache::new(&config.cache, clock));
        let authorizer = Arc::new(IntrospectionAuthorizer::new(introspector, cache));
        let claims: Arc<dyn ClaimsSource> = match config.claims_source {
            ClaimsSourceKind::BearerJwt => Arc::new(BearerJwtClaims),
            ClaimsSourceKind::Introspection => Arc::new(IntrospectedClaims),
        };
        let (producer, consumer) = handoff_channel();

        Self {
            config,
            authorizer,
            claims,
            consumer,
            lifecycle: Mutex::new(Lifecycle {
                state: BridgeState::Created,
                producer: Some(producer),
                local_addr: None,
                shutdown_tx: None,
                server: None,
                cleanup: None,
            }),
        }
    }

    /// Create a bridge calling the configured introspection endpoint
    pub fn from_config(config: InputConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ConfigError::Invalid(format!("introspection http client: {}", e)))?;
        let introspector = Arc::new(HttpIntrospector::new(client, config.introspect_url.clone()));
        Ok(Self::new(config, introspector, Arc::new(SystemTimeSource)))
    }

    /// Bind the listener and start serving.
    ///
    /// Returns the bound address, which differs from the configured one when
    /// port 0 was requested.
    pub async fn start(&self) -> Result<SocketAddr, BridgeError> {
        self.ensure_state(BridgeState::Created)?;

        let listener = TcpListener::bind(&self.config.address)
            .await
            .map_err(|source| BridgeError::Bind {
                address: self.config.address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr().map_err(|source| BridgeError::Bind {
            address: self.config.address.clone(),
            source,
        })?;

        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != BridgeState::Created {
            return Err(BridgeError::AlreadyStarted);
        }
        let producer = lifecycle.producer.take().ok_or(BridgeError::Closed)?;

        let router = self.build_router(producer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(async move {
            let result = axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await;
            if let Err(e) = result {
                error!(error = %e, "Collector input server error");
            }
        });

        let cache = Arc::clone(self.authorizer.cache());
        let purge_every = cache.ttl().max(MIN_PURGE_INTERVAL);
        let cleanup = tokio::spawn(cleanup_task(cache, purge_every));

        lifecycle.state = BridgeState::Listening;
        lifecycle.local_addr = Some(local_addr);
        lifecycle.shutdown_tx = Some(shutdown_tx);
        lifecycle.server = Some(server);
        lifecycle.cleanup = Some(cleanup);

        info!(
            addr = %local_addr,
            path = %self.config.path,
            claims_source = ?self.config.claims_source,
            "Collector input listening"
        );
        Ok(local_addr)
    }

    /// Stop accepting connections.
    ///
    /// In-flight requests still complete. Once they have, [`pull`](Self::pull)
    /// fails with [`BridgeError::Closed`].
    pub fn stop(&self) -> Result<(), BridgeError> {
        let mut lifecycle = self.lifecycle.lock();
        match lifecycle.state {
            BridgeState::Closed => return Err(BridgeError::Closed),
            BridgeState::Created | BridgeState::Listening => {}
        }

        lifecycle.state = BridgeState::Closed;
        lifecycle.producer = None;
        if let Some(tx) = lifecycle.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(cleanup) = lifecycle.cleanup.take() {
            cleanup.abort();
        }

        info!("Collector input stopping");
        Ok(())
    }

    /// Stop, then wait up to `grace` for in-flight requests to drain
    pub async fn shutdown(&self, grace: Duration) -> Result<(), BridgeError> {
        self.stop()?;
        let server = self.lifecycle.lock().server.take();
        if let Some(server) = server {
            if tokio::time::timeout(grace, server).await.is_err() {
                warn!(grace_ms = grace.as_millis() as u64, "Collector input did not drain in time");
            }
        }
        Ok(())
    }

    /// Next accepted message and its ack handle
    pub async fn pull(&self) -> Result<(Message, AckHandle), BridgeError> {
        self.consumer.pull().await
    }

    pub fn state(&self) -> BridgeState {
        self.lifecycle.lock().state
    }

    /// Bound address once listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.lock().local_addr
    }

    pub fn stats(&self) -> &BridgeStats {
        self.consumer.stats()
    }

    pub fn authorizer(&self) -> &Arc<IntrospectionAuthorizer> {
        &self.authorizer
    }

    fn ensure_state(&self, expected: BridgeState) -> Result<(), BridgeError> {
        match self.lifecycle.lock().state {
            state if state == expected => Ok(()),
            BridgeState::Closed => Err(BridgeError::Closed),
            _ => Err(BridgeError::AlreadyStarted),
        }
    }

    fn build_router(&self, producer: HandoffProducer) -> Router {
        let stack = MiddlewareStack::new(
            &self.config,
            Arc::clone(&self.authorizer),
            Arc::clone(&self.claims),
        );
        let state = IngressState {
            producer,
            max_body_size: self.config.max_body_size,
        };

        Router::new()
            .route(&self.config.path, post(handle_collect))
            .route_layer(
                ServiceBuilder::new()
                    .layer(stack.timeout)
                    .layer(stack.filters),
            )
            .layer(
                ServiceBuilder::new()
                    .layer(recovery_layer())
                    .layer(stack.tracing),
            )
            .with_state(state)
    }
}

#[async_trait]
impl MessageSource for IngressBridge {
    async fn pull(&self) -> Result<(Message, AckHandle), BridgeError> {
        IngressBridge::pull(self).await
    }
}

/// Read the body, tag it with the tenant and wait for the consumer's ack
async fn handle_collect(State(state): State<IngressState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();
    let id = parts
        .extensions
        .get::<CorrelationId>()
        .copied()
        .unwrap_or_default();

    let payload = match axum::body::to_bytes(body, state.max_body_size).await {
        Ok(payload) => payload,
        Err(e) => {
            let reason = RejectReason::BodyRead(e.to_string());
            warn!(correlation_id = %id, reason = %reason, "Request body unreadable");
            return reason.into_response();
        }
    };

    let organization = parts
        .headers
        .get(ORGANIZATION_KEY)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let message = Message::new(payload).with_meta(ORGANIZATION_KEY, organization);

    match state.producer.submit_as(id, message).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(reason) => {
            error!(correlation_id = %id, reason = %reason, "Message not accepted");
            reason.into_response()
        }
    }
}
