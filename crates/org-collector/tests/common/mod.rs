//! Stub authorities and sinks shared by the integration tests.

#![allow(dead_code)]

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Form, Json, Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use org_collector::{AckError, IngressBridge, InputConfig, Message};

// =============================================================================
// SERVERS
// =============================================================================

pub async fn serve(router: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    addr
}

pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn jwt(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"none","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{}.{}.sig", header, payload)
}

/// Identity token listing `orgs` as the caller's organizations
pub fn member_token(orgs: &[&str]) -> String {
    let organizations: Vec<Value> = orgs.iter().map(|id| json!({"id": id})).collect();
    jwt(&json!({"sub": "agent-1", "organizations": organizations, "exp": now_secs() + 3600}))
}

// =============================================================================
// INTROSPECTION AUTHORITY
// =============================================================================

/// Introspection endpoint answering active for every token not starting
/// with "revoked". Active verdicts list org1.
pub struct IntrospectionStub {
    pub url: String,
    pub calls: Arc<AtomicUsize>,
}

impl IntrospectionStub {
    pub async fn start() -> Self {
        let calls = Arc::new(AtomicUsize::new(0));
        let router = Router::new()
            .route("/introspect", post(introspect))
            .with_state(Arc::clone(&calls));
        let addr = serve(router).await;

        Self {
            url: format!("http://{}/introspect", addr),
            calls,
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

async fn introspect(
    State(calls): State<Arc<AtomicUsize>>,
    Form(form): Form<HashMap<String, String>>,
) -> Json<Value> {
    calls.fetch_add(1, Ordering::SeqCst);
    let token = form.get("token").cloned().unwrap_or_default();
    if token.is_empty() || token.starts_with("revoked") {
        return Json(json!({"active": false}));
    }
    Json(json!({
        "active": true,
        "exp": now_secs() + 3600,
        "organizations": [{"id": "org1"}]
    }))
}

// =============================================================================
// BRIDGE + CONSUMER
// =============================================================================

pub fn input_config(introspect_url: &str) -> InputConfig {
    InputConfig {
        address: "127.0.0.1:0".to_string(),
        path: "/collect".to_string(),
        introspect_url: introspect_url.to_string(),
        ..Default::default()
    }
}

pub async fn start_bridge(config: InputConfig) -> (Arc<IngressBridge>, String) {
    let bridge = Arc::new(IngressBridge::from_config(config.clone()).unwrap());
    let addr = bridge.start().await.unwrap();
    (bridge, format!("http://{}{}", addr, config.path))
}

/// Consumer acking every message, failing those whose payload contains "reject"
pub struct Consumer {
    pub received: Arc<Mutex<Vec<Message>>>,
    pub task: JoinHandle<()>,
}

impl Consumer {
    pub fn spawn(bridge: Arc<IngressBridge>) -> Self {
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let task = tokio::spawn(async move {
            while let Ok((message, ack)) = bridge.pull().await {
                let reject = String::from_utf8_lossy(message.payload()).contains("reject");
                sink.lock().push(message);
                if reject {
                    ack.ack(Err(AckError::new("rejected by consumer")));
                } else {
                    ack.ack(Ok(()));
                }
            }
        });
        Self { received, task }
    }

    pub fn payloads(&self) -> Vec<String> {
        self.received
            .lock()
            .iter()
            .map(|m| String::from_utf8_lossy(m.payload()).into_owned())
            .collect()
    }
}

// =============================================================================
// CREDENTIAL AUTHORITY + SINK
// =============================================================================

/// What the sink saw for one request
#[derive(Debug, Clone, PartialEq)]
pub struct SinkRecord {
    pub authorization: String,
    pub agent: String,
    pub organization: String,
    pub content_type: String,
    pub body: Bytes,
}

#[derive(Clone)]
struct DownstreamState {
    lifetime_secs: u64,
    exchange_delay: Duration,
    auth_status: StatusCode,
    sink_status: Arc<Mutex<StatusCode>>,
    exchanges: Arc<AtomicUsize>,
    records: Arc<Mutex<Vec<SinkRecord>>>,
}

/// Credential exchange endpoint plus the sink it protects
pub struct Downstream {
    pub auth_url: String,
    pub sink_url: String,
    state: DownstreamState,
}

impl Downstream {
    pub async fn start(lifetime_secs: u64) -> Self {
        Self::start_with(lifetime_secs, Duration::ZERO, StatusCode::OK).await
    }

    pub async fn start_with(
        lifetime_secs: u64,
        exchange_delay: Duration,
        auth_status: StatusCode,
    ) -> Self {
        let state = DownstreamState {
            lifetime_secs,
            exchange_delay,
            auth_status,
            sink_status: Arc::new(Mutex::new(StatusCode::OK)),
            exchanges: Arc::new(AtomicUsize::new(0)),
            records: Arc::new(Mutex::new(Vec::new())),
        };
        let router = Router::new()
            .route("/auth", post(exchange))
            .route("/collect", post(collect))
            .with_state(state.clone());
        let addr = serve(router).await;

        Self {
            auth_url: format!("http://{}/auth", addr),
            sink_url: format!("http://{}/collect", addr),
            state,
        }
    }

    pub fn exchanges(&self) -> usize {
        self.state.exchanges.load(Ordering::SeqCst)
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.state.records.lock().clone()
    }

    pub fn set_sink_status(&self, status: StatusCode) {
        *self.state.sink_status.lock() = status;
    }
}

async fn exchange(
    State(state): State<DownstreamState>,
    Json(body): Json<Value>,
) -> (StatusCode, Json<Value>) {
    let n = state.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
    assert_eq!(body["strategy"], "m2m");
    assert_eq!(body["token"], "machine-secret");

    if !state.exchange_delay.is_zero() {
        tokio::time::sleep(state.exchange_delay).await;
    }
    if state.auth_status != StatusCode::OK {
        return (state.auth_status, Json(json!({"error": "denied"})));
    }

    let token = jwt(&json!({
        "sub": format!("machine-{}", n),
        "exp": now_secs() + state.lifetime_secs
    }));
    (StatusCode::OK, Json(json!({"data": {"jwt": token}})))
}

async fn collect(State(state): State<DownstreamState>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    state.records.lock().push(SinkRecord {
        authorization: header("authorization"),
        agent: header("x-agent-id"),
        organization: header("organization"),
        content_type: header("content-type"),
        body,
    });
    *state.sink_status.lock()
}
