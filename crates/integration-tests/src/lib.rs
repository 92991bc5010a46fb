//! Integration tests for cartsync.
//!
//! # Running Tests
//!
//! ```bash
//! cargo test -p cartsync-integration-tests
//! ```
//!
//! Every test starts its own [`MockBackend`]: an in-process `axum` server on
//! an ephemeral port that speaks the order-form checkout API, so the real
//! `reqwest` transport, gateway and engine run unmodified.
//!
//! # Test Categories
//!
//! - `transport_auth` - credential injection and the 401 revalidation cycle
//! - `order_form_gateway` - wire format and error mapping
//! - `engine_end_to_end` - the sync engine against the mock backend

use std::collections::{HashMap, HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, Uri, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use cartsync_storefront::session::{CredentialRenewer, SessionError, SessionToken};
use cartsync_storefront::{AuthenticatedTransport, BackendConfig, Session};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use url::Url;

/// Header the default credential scheme uses.
pub const CREDENTIAL_HEADER: &str = "VtexIdclientAutCookie";

/// Unit price of every product unless overridden, in cents.
pub const DEFAULT_PRICE_CENTS: i64 = 1000;

// =============================================================================
// Recorded traffic
// =============================================================================

/// A request as the mock backend saw it.
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    /// Value of the credential header.
    pub credential: Option<String>,
    /// Raw `Cookie` header.
    pub cookie: Option<String>,
    pub body: Option<Value>,
}

/// A canned failure returned instead of the next successful response.
#[derive(Debug, Clone)]
pub struct InjectedFailure {
    pub status: StatusCode,
    pub body: String,
    pub retry_after: Option<u64>,
}

impl InjectedFailure {
    /// A failure with a JSON or plain-text body.
    #[must_use]
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
            retry_after: None,
        }
    }
}

#[derive(Debug, Clone)]
struct MockLine {
    unique_id: String,
    sku: String,
    quantity: u32,
}

#[derive(Default)]
struct BackendState {
    orders: Mutex<HashMap<String, Vec<MockLine>>>,
    require_auth: AtomicBool,
    valid_tokens: Mutex<HashSet<String>>,
    prices: Mutex<HashMap<String, i64>>,
    stock: Mutex<HashMap<String, u32>>,
    failures: Mutex<VecDeque<InjectedFailure>>,
    requests: Mutex<Vec<RecordedRequest>>,
    next_line: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// MockBackend
// =============================================================================

/// In-process order-form backend.
pub struct MockBackend {
    state: Arc<BackendState>,
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl MockBackend {
    /// Start a backend on an ephemeral local port.
    ///
    /// # Panics
    ///
    /// Panics if the listener cannot be bound.
    pub async fn start() -> Self {
        let state = Arc::new(BackendState::default());

        let app = Router::new()
            .route("/api/checkout/pub/orderForm/{id}", get(get_order_form))
            .route("/api/checkout/pub/orderForm/{id}/items", post(replace_items))
            .route(
                "/api/checkout/pub/orderForm/{id}/items/update",
                post(update_items),
            )
            .with_state(state.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind mock backend");
        let addr = listener.local_addr().expect("Failed to read local address");
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Self {
            state,
            addr,
            server,
        }
    }

    /// Base URL of the backend.
    ///
    /// # Panics
    ///
    /// Panics if the socket address does not form a URL.
    #[must_use]
    pub fn base_url(&self) -> Url {
        Url::parse(&format!("http://{}", self.addr)).expect("Invalid mock backend URL")
    }

    /// Backend settings pointing at this server.
    #[must_use]
    pub fn backend_config(&self) -> BackendConfig {
        BackendConfig::new(self.base_url())
    }

    /// Transport for this server, optionally authenticated.
    ///
    /// # Panics
    ///
    /// Panics if the transport cannot be built.
    #[must_use]
    pub fn transport(&self, session: Option<Arc<dyn Session>>) -> AuthenticatedTransport {
        AuthenticatedTransport::new(&self.backend_config(), session)
            .expect("Failed to build transport")
    }

    /// Create an order form with `(sku, quantity)` lines.
    pub fn create_order(&self, order_id: &str, lines: &[(&str, u32)]) {
        let lines = lines
            .iter()
            .map(|(sku, quantity)| self.new_line(sku, *quantity))
            .collect();
        lock(&self.state.orders).insert(order_id.to_string(), lines);
    }

    /// Current `(sku, quantity)` lines of an order form.
    #[must_use]
    pub fn order_lines(&self, order_id: &str) -> Vec<(String, u32)> {
        lock(&self.state.orders)
            .get(order_id)
            .map(|lines| {
                lines
                    .iter()
                    .map(|line| (line.sku.clone(), line.quantity))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Reject requests whose credential is not in the accepted set.
    pub fn require_auth(&self, accepted: &[&str]) {
        self.state.require_auth.store(true, Ordering::SeqCst);
        let mut tokens = lock(&self.state.valid_tokens);
        tokens.clear();
        tokens.extend(accepted.iter().map(|token| (*token).to_string()));
    }

    pub fn set_price(&self, sku: &str, cents: i64) {
        lock(&self.state.prices).insert(sku.to_string(), cents);
    }

    pub fn cap_stock(&self, sku: &str, available: u32) {
        lock(&self.state.stock).insert(sku.to_string(), available);
    }

    /// Answer the next authorized request with `failure`.
    pub fn fail_next(&self, failure: InjectedFailure) {
        lock(&self.state.failures).push_back(failure);
    }

    /// Every request received so far.
    #[must_use]
    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.requests).clone()
    }

    fn new_line(&self, sku: &str, quantity: u32) -> MockLine {
        MockLine {
            unique_id: format!("line-{}", self.state.next_line.fetch_add(1, Ordering::SeqCst)),
            sku: sku.to_string(),
            quantity,
        }
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.server.abort();
    }
}

// =============================================================================
// Handlers
// =============================================================================

type Shared = State<Arc<BackendState>>;

async fn get_order_form(
    State(state): Shared,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if let Err(response) = admit(&state, "GET", &uri, &headers, None) {
        return response;
    }
    respond_with_order(&state, &id)
}

async fn replace_items(
    State(state): Shared,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = admit(&state, "POST", &uri, &headers, Some(&body)) {
        return response;
    }

    {
        let mut orders = lock(&state.orders);
        let Some(lines) = orders.get_mut(&id) else {
            return not_found();
        };
        let previous = std::mem::take(lines);

        for item in order_items(&body) {
            let sku = item["id"].as_str().unwrap_or_default().to_string();
            let requested = quantity_of(item);
            let quantity = capped(&state, &sku, requested);
            if quantity == 0 {
                continue;
            }
            let unique_id = item["uniqueId"]
                .as_str()
                .map(str::to_string)
                .or_else(|| {
                    previous
                        .iter()
                        .find(|line| line.sku == sku)
                        .map(|line| line.unique_id.clone())
                })
                .unwrap_or_else(|| {
                    format!("line-{}", state.next_line.fetch_add(1, Ordering::SeqCst))
                });
            lines.push(MockLine {
                unique_id,
                sku,
                quantity,
            });
        }
    }

    respond_with_order(&state, &id)
}

async fn update_items(
    State(state): Shared,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if let Err(response) = admit(&state, "POST", &uri, &headers, Some(&body)) {
        return response;
    }

    {
        let mut orders = lock(&state.orders);
        let Some(lines) = orders.get_mut(&id) else {
            return not_found();
        };

        for item in order_items(&body) {
            let unique_id = item["uniqueId"].as_str().unwrap_or_default();
            let requested = quantity_of(item);
            if let Some(line) = lines.iter_mut().find(|line| line.unique_id == unique_id) {
                line.quantity = capped(&state, &line.sku, requested);
            }
        }
        lines.retain(|line| line.quantity > 0);
    }

    respond_with_order(&state, &id)
}

/// Record the request, enforce authentication and apply injected failures.
fn admit(
    state: &BackendState,
    method: &str,
    uri: &Uri,
    headers: &HeaderMap,
    body: Option<&Value>,
) -> Result<(), Response> {
    let credential = header_str(headers, CREDENTIAL_HEADER);
    lock(&state.requests).push(RecordedRequest {
        method: method.to_string(),
        path: uri.path().to_string(),
        credential: credential.clone(),
        cookie: header_str(headers, header::COOKIE.as_str()),
        body: body.cloned(),
    });

    if state.require_auth.load(Ordering::SeqCst) {
        let accepted = credential.is_some_and(|token| lock(&state.valid_tokens).contains(&token));
        if !accepted {
            return Err((StatusCode::UNAUTHORIZED, "").into_response());
        }
    }

    if let Some(failure) = lock(&state.failures).pop_front() {
        let mut response = (failure.status, failure.body).into_response();
        if let Some(seconds) = failure.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(seconds));
        }
        return Err(response);
    }

    Ok(())
}

fn respond_with_order(state: &BackendState, id: &str) -> Response {
    let orders = lock(&state.orders);
    let Some(lines) = orders.get(id) else {
        return not_found();
    };
    let prices = lock(&state.prices);
    let price = |sku: &str| prices.get(sku).copied().unwrap_or(DEFAULT_PRICE_CENTS);

    let items: Vec<Value> = lines
        .iter()
        .map(|line| {
            json!({
                "uniqueId": line.unique_id,
                "id": line.sku,
                "name": format!("Product {}", line.sku),
                "imageUrl": format!("https://img.test/{}.png", line.sku),
                "quantity": line.quantity,
                "sellingPrice": price(&line.sku),
                "seller": "1",
            })
        })
        .collect();
    let value: i64 = lines
        .iter()
        .map(|line| price(&line.sku) * i64::from(line.quantity))
        .sum();

    Json(json!({
        "orderFormId": id,
        "value": value,
        "items": items,
        "storePreferencesData": {"currencyCode": "USD"},
    }))
    .into_response()
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": {"code": "CHK0003", "message": "Order form not found"}})),
    )
        .into_response()
}

fn order_items(body: &Value) -> impl Iterator<Item = &Value> {
    body["orderItems"].as_array().into_iter().flatten()
}

fn quantity_of(item: &Value) -> u32 {
    item["quantity"]
        .as_u64()
        .and_then(|q| u32::try_from(q).ok())
        .unwrap_or(0)
}

fn capped(state: &BackendState, sku: &str, requested: u32) -> u32 {
    lock(&state.stock)
        .get(sku)
        .map_or(requested, |available| requested.min(*available))
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

// =============================================================================
// Session helpers
// =============================================================================

/// Renewer that hands out a fixed token, or rejects every attempt.
pub struct StaticRenewer {
    token: Option<String>,
    calls: AtomicUsize,
}

impl StaticRenewer {
    /// Renew to `token`.
    #[must_use]
    pub fn issuing(token: &str) -> Arc<Self> {
        Arc::new(Self {
            token: Some(token.to_string()),
            calls: AtomicUsize::new(0),
        })
    }

    /// Reject every renewal.
    #[must_use]
    pub fn rejecting() -> Arc<Self> {
        Arc::new(Self {
            token: None,
            calls: AtomicUsize::new(0),
        })
    }

    /// Number of renewals attempted.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CredentialRenewer for StaticRenewer {
    async fn renew(&self) -> Result<SessionToken, SessionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.token
            .as_deref()
            .map(SessionToken::new)
            .ok_or_else(|| SessionError::Rejected("stored login no longer valid".to_string()))
    }
}
