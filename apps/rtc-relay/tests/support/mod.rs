#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, oneshot};
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt::SubscriberBuilder};

pub fn init_tracing() {
    let _ = SubscriberBuilder::default()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .with_max_level(tracing::Level::TRACE)
        .try_init();
}

/// What the stub relay has seen and what it will answer next.
pub struct RelayState {
    pub offers: Vec<Value>,
    pub offer_content_types: Vec<String>,
    pub posted: Vec<(Option<String>, Value)>,
    pub fetch_scopes: Vec<Option<String>>,
    /// Scripted GET bodies; `None` answers `null`. Empty script answers `[]`.
    pub fetch_script: VecDeque<Option<Vec<Value>>>,
    pub answer: Value,
    /// Raw body returned instead of `answer` when set.
    pub raw_answer: Option<String>,
    pub offer_failure: Option<(StatusCode, String)>,
}

impl Default for RelayState {
    fn default() -> Self {
        Self {
            offers: Vec::new(),
            offer_content_types: Vec::new(),
            posted: Vec::new(),
            fetch_scopes: Vec::new(),
            fetch_script: VecDeque::new(),
            answer: json!({ "sdp": "answer-sdp", "id": 42 }),
            raw_answer: None,
            offer_failure: None,
        }
    }
}

pub type SharedRelay = Arc<AsyncMutex<RelayState>>;

pub struct StubRelay {
    pub addr: SocketAddr,
    pub base_url: String,
    pub state: SharedRelay,
    shutdown: Option<oneshot::Sender<()>>,
}

impl StubRelay {
    pub async fn start() -> Self {
        Self::start_with(RelayState::default(), None).await
    }

    pub async fn start_under(prefix: &str) -> Self {
        Self::start_with(RelayState::default(), Some(prefix)).await
    }

    pub async fn start_with(state: RelayState, prefix: Option<&str>) -> Self {
        let state = Arc::new(AsyncMutex::new(state));
        let api = relay_router(state.clone());
        let router = match prefix {
            Some(prefix) => Router::new().nest(prefix, api),
            None => api,
        };
        let (addr, shutdown) = serve(router).await;
        let base_url = format!("http://{addr}{}", prefix.unwrap_or(""));
        Self {
            addr,
            base_url,
            state,
            shutdown: Some(shutdown),
        }
    }

    pub async fn offers(&self) -> Vec<Value> {
        self.state.lock().await.offers.clone()
    }

    pub async fn posted(&self) -> Vec<(Option<String>, Value)> {
        self.state.lock().await.posted.clone()
    }

    pub async fn fetch_scopes(&self) -> Vec<Option<String>> {
        self.state.lock().await.fetch_scopes.clone()
    }

    pub async fn script_fetch(&self, body: Option<Vec<Value>>) {
        self.state.lock().await.fetch_script.push_back(body);
    }
}

impl Drop for StubRelay {
    fn drop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
    }
}

pub async fn serve(router: Router) -> (SocketAddr, oneshot::Sender<()>) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("listener bind");
    let addr = listener.local_addr().expect("local addr");
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await
            .ok();
    });
    (addr, shutdown_tx)
}

fn relay_router(state: SharedRelay) -> Router {
    Router::new()
        .route("/api/new_offer", post(post_offer))
        .route(
            "/api/ice_candidate",
            post(post_candidate).get(get_candidates),
        )
        .with_state(state)
}

async fn post_offer(
    State(state): State<SharedRelay>,
    headers: axum::http::HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    debug!("stub: received offer");
    let mut guard = state.lock().await;
    guard.offers.push(body);
    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    guard.offer_content_types.push(content_type);

    if let Some((status, body)) = guard.offer_failure.clone() {
        return (status, body).into_response();
    }
    if let Some(raw) = guard.raw_answer.clone() {
        return (StatusCode::OK, raw).into_response();
    }
    Json(guard.answer.clone()).into_response()
}

async fn post_candidate(
    State(state): State<SharedRelay>,
    Query(params): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> StatusCode {
    debug!("stub: received candidate");
    let mut guard = state.lock().await;
    guard.posted.push((params.get("id").cloned(), body));
    StatusCode::OK
}

async fn get_candidates(
    State(state): State<SharedRelay>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<Value> {
    let mut guard = state.lock().await;
    guard.fetch_scopes.push(params.get("id").cloned());
    let body = match guard.fetch_script.pop_front() {
        Some(Some(candidates)) => Value::Array(candidates),
        Some(None) => Value::Null,
        None => json!([]),
    };
    Json(body)
}
