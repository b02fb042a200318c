//! Shared test helpers: an in-process mock of the backend and a wired-up
//! client stack pointed at it.

#![allow(dead_code)]

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::{Json, Router};
use fieldsync_client::{
    ClientConfig, ConnectivityMonitor, HttpClient, LocalStore, NetworkSignal, StaticSession, SyncEngine,
};
use fieldsync_engine::{Catalog, RetryPolicy};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A request as the backend received it.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub method: String,
    pub path: String,
    pub body: Value,
    pub authorization: Option<String>,
    pub api_key: Option<String>,
    pub user_id: Option<String>,
}

/// Shared mock state.
#[derive(Default)]
pub struct MockState {
    requests: Mutex<Vec<Recorded>>,
    /// Responses served before normal handling, in order
    scripted: Mutex<VecDeque<(u16, Value)>>,
    /// Listing per collection path
    collections: Mutex<HashMap<String, Vec<Value>>>,
    next_id: AtomicU64,
    reject_credentials: AtomicBool,
    /// Flip this monitor offline once, when the Nth request arrives
    offline_after: Mutex<Option<(usize, Arc<ConnectivityMonitor>)>>,
    delay: Mutex<Option<Duration>>,
}

/// Mock backend speaking the backend's routes.
pub struct MockBackend {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockBackend {
    pub async fn start() -> Self {
        let state = Arc::new(MockState {
            next_id: AtomicU64::new(42),
            ..Default::default()
        });

        let app = Router::new().fallback(handle).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn requests(&self) -> Vec<Recorded> {
        self.state.requests.lock().clone()
    }

    /// Requests with the given method, in arrival order.
    pub fn requests_with(&self, method: &str) -> Vec<Recorded> {
        self.requests().into_iter().filter(|r| r.method == method).collect()
    }

    pub fn respond_next(&self, status: u16, body: Value) {
        self.state.scripted.lock().push_back((status, body));
    }

    pub fn reject_credentials(&self) {
        self.state.reject_credentials.store(true, Ordering::SeqCst);
    }

    pub fn go_offline_after(&self, requests: usize, monitor: Arc<ConnectivityMonitor>) {
        *self.state.offline_after.lock() = Some((requests, monitor));
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.state.delay.lock() = Some(delay);
    }

    pub fn set_listing(&self, path: &str, items: Vec<Value>) {
        self.state.collections.lock().insert(path.to_string(), items);
    }
}

async fn handle(
    State(state): State<Arc<MockState>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    let body: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string);

    let received = {
        let mut requests = state.requests.lock();
        requests.push(Recorded {
            method: method.to_string(),
            path: uri.path().to_string(),
            body: body.clone(),
            authorization: header("authorization"),
            api_key: header("x-api-key"),
            user_id: header("x-user-id"),
        });
        requests.len()
    };

    let delay = *state.delay.lock();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }

    {
        let mut offline_after = state.offline_after.lock();
        if offline_after.as_ref().is_some_and(|(after, _)| received >= *after) {
            if let Some((_, monitor)) = offline_after.take() {
                monitor.signal(NetworkSignal::Offline);
            }
        }
    }

    let scripted = state.scripted.lock().pop_front();
    if let Some((status, body)) = scripted {
        return reply(status, body);
    }

    if state.reject_credentials.load(Ordering::SeqCst) {
        return reply(401, json!({"detail": "Token has expired"}));
    }

    let path = uri.path().to_string();
    match method {
        Method::POST => {
            if body.get("name").and_then(Value::as_str) == Some("bad") {
                return reply(
                    422,
                    json!({"detail": [{"loc": ["body", "name"], "msg": "name is invalid"}]}),
                );
            }
            let id = state.next_id.fetch_add(1, Ordering::SeqCst);
            let mut created = body.as_object().cloned().unwrap_or_default();
            created.insert("id".into(), json!(id));
            let created = Value::Object(created);
            state.collections.lock().entry(path).or_default().push(created.clone());
            reply(201, created)
        }
        Method::PUT => {
            let id = path.rsplit('/').next().unwrap_or_default().to_string();
            let mut updated = body.as_object().cloned().unwrap_or_default();
            updated.insert("id".into(), json!(id));
            reply(200, Value::Object(updated))
        }
        Method::DELETE => reply(200, json!({"success": true})),
        Method::GET => {
            let items = state.collections.lock().get(&path).cloned().unwrap_or_default();
            if path == "/cow-profiles/" {
                reply(200, json!({"success": true, "count": items.len(), "cow_profiles": items}))
            } else {
                reply(200, Value::Array(items))
            }
        }
        _ => reply(405, json!({"detail": "method not allowed"})),
    }
}

fn reply(status: u16, body: Value) -> axum::response::Response {
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(body)).into_response()
}

/// Base URL nothing listens on.
pub async fn unreachable_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

/// Retry policy with short delays for tests.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::new(3, Duration::from_millis(5))
}

pub fn test_config(base_url: &str) -> ClientConfig {
    ClientConfig::new(base_url)
        .with_retry(fast_retry())
        .with_request_timeout(Duration::from_secs(5))
        .with_api_key("test-key")
}

/// The full client stack against one backend.
pub struct Harness {
    pub store: LocalStore,
    pub engine: Arc<SyncEngine>,
    pub monitor: Arc<ConnectivityMonitor>,
    pub session: Arc<StaticSession>,
}

impl Harness {
    pub async fn new(base_url: &str, online: bool) -> Self {
        Self::with_config(&test_config(base_url), online).await
    }

    pub async fn with_config(config: &ClientConfig, online: bool) -> Self {
        let store = LocalStore::in_memory(Catalog::standard()).await.unwrap();
        let session = Arc::new(StaticSession::new(Some("token-1".into()), Some("user-7".into())));
        let http = HttpClient::new(config, session.clone()).unwrap();
        let monitor = ConnectivityMonitor::new_shared(online);
        let engine = SyncEngine::new_shared(store.clone(), http, monitor.handle());

        Self {
            store,
            engine,
            monitor,
            session,
        }
    }
}
