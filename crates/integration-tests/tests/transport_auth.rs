//! Integration tests for the authenticated transport.
//!
//! Covers credential placement and the bounded 401 revalidation cycle
//! against an in-process backend.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use axum::http::StatusCode;
use cartsync_integration_tests::{InjectedFailure, MockBackend, StaticRenewer};
use cartsync_storefront::session::CredentialRenewer;
use cartsync_storefront::{
    ApiRequest, AuthenticatedTransport, CredentialScheme, Session, SessionEvent, SessionToken,
    TokenSession, TransportError,
};
use secrecy::ExposeSecret;
use serde_json::Value;

const ORDER: &str = "of-auth";
const ORDER_PATH: &str = "/api/checkout/pub/orderForm/of-auth";

fn session(token: &str, renewer: Option<Arc<dyn CredentialRenewer>>) -> TokenSession {
    TokenSession::new(Some(SessionToken::new(token)), renewer)
}

async fn backend() -> MockBackend {
    let backend = MockBackend::start().await;
    backend.create_order(ORDER, &[("sku-1", 1)]);
    backend
}

// ============================================================================
// Credential placement
// ============================================================================

#[tokio::test]
async fn test_credential_sent_in_default_header() {
    let backend = backend().await;
    backend.require_auth(&["good"]);
    let session = session("good", None);
    let transport = backend.transport(Some(Arc::new(session)));

    let form: Value = transport.send(&ApiRequest::get(ORDER_PATH)).await.unwrap();

    assert_eq!(form["orderFormId"], ORDER);
    let requests = backend.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].credential.as_deref(), Some("good"));
}

#[tokio::test]
async fn test_cookie_scheme_merges_with_request_cookies() {
    let backend = backend().await;
    let mut config = backend.backend_config();
    config.credential_scheme = CredentialScheme::Cookie("auth".to_string());
    let cookie_session: Arc<dyn Session> = Arc::new(session("tok", None));
    let transport = AuthenticatedTransport::new(&config, Some(cookie_session)).unwrap();

    let request = ApiRequest::get(ORDER_PATH).with_cookie("checkout.vtex.com=__ofid=of-auth");
    let _: Value = transport.send(&request).await.unwrap();

    let cookie = backend.requests()[0].cookie.clone().unwrap();
    assert!(cookie.contains("checkout.vtex.com=__ofid=of-auth"));
    assert!(cookie.contains("auth=tok"));
    assert!(backend.requests()[0].credential.is_none());
}

// ============================================================================
// 401 handling
// ============================================================================

#[tokio::test]
async fn test_unauthorized_without_session_is_not_retried() {
    let backend = backend().await;
    backend.require_auth(&["good"]);
    let transport = backend.transport(None);

    let result = transport.send::<Value>(&ApiRequest::get(ORDER_PATH)).await;

    assert!(matches!(result, Err(TransportError::AuthenticationUnavailable)));
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn test_revalidation_retries_once_with_new_credential() {
    let backend = backend().await;
    backend.require_auth(&["fresh"]);
    let renewer = StaticRenewer::issuing("fresh");
    let session = session("stale", Some(renewer.clone()));
    let transport = backend.transport(Some(Arc::new(session.clone())));

    let form: Value = transport.send(&ApiRequest::get(ORDER_PATH)).await.unwrap();

    assert_eq!(form["orderFormId"], ORDER);
    let credentials: Vec<_> = backend
        .requests()
        .into_iter()
        .map(|r| r.credential.unwrap())
        .collect();
    assert_eq!(credentials, vec!["stale", "fresh"]);
    assert_eq!(renewer.calls(), 1);
    assert_eq!(session.credential().await.unwrap().expose_secret(), "fresh");
}

#[tokio::test]
async fn test_second_unauthorized_forces_logout() {
    let backend = backend().await;
    backend.require_auth(&["never"]);
    let renewer = StaticRenewer::issuing("still-wrong");
    let session = session("stale", Some(renewer.clone()));
    let mut events = session.subscribe();
    let transport = backend.transport(Some(Arc::new(session.clone())));

    let result = transport.send::<Value>(&ApiRequest::get(ORDER_PATH)).await;

    assert!(matches!(result, Err(TransportError::AuthenticationExhausted)));
    // Exactly the original request and one retry.
    assert_eq!(backend.requests().len(), 2);
    assert_eq!(renewer.calls(), 1);
    assert!(!session.is_signed_in().await);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::Renewed);
    assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
}

#[tokio::test]
async fn test_rejected_revalidation_forces_logout() {
    let backend = backend().await;
    backend.require_auth(&["good"]);
    let renewer = StaticRenewer::rejecting();
    let session = session("stale", Some(renewer.clone()));
    let transport = backend.transport(Some(Arc::new(session.clone())));

    let result = transport.send::<Value>(&ApiRequest::get(ORDER_PATH)).await;

    assert!(matches!(result, Err(TransportError::AuthenticationFailed(_))));
    assert_eq!(backend.requests().len(), 1);
    assert_eq!(renewer.calls(), 1);
    assert!(!session.is_signed_in().await);
}

#[tokio::test]
async fn test_unsupported_revalidation_forces_logout() {
    let backend = backend().await;
    backend.require_auth(&["good"]);
    let session = session("stale", None);
    let transport = backend.transport(Some(Arc::new(session.clone())));

    let result = transport.send::<Value>(&ApiRequest::get(ORDER_PATH)).await;

    assert!(matches!(result, Err(TransportError::AuthenticationFailed(_))));
    assert!(!session.is_signed_in().await);
}

// ============================================================================
// Other failures
// ============================================================================

#[tokio::test]
async fn test_unparseable_error_body_gets_synthetic_message() {
    let backend = backend().await;
    backend.fail_next(InjectedFailure::new(
        StatusCode::BAD_GATEWAY,
        "<html>upstream down</html>",
    ));
    let transport = backend.transport(None);

    let result = transport.send::<Value>(&ApiRequest::get(ORDER_PATH)).await;

    match result {
        Err(TransportError::Remote { status, message }) => {
            assert_eq!(status, 502);
            assert_eq!(message, "Unknown error, status 502. Could not parse JSON.");
        }
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_structured_error_body_message() {
    let backend = backend().await;
    backend.fail_next(InjectedFailure::new(
        StatusCode::BAD_REQUEST,
        r#"{"error":{"code":"ORD002","message":"Item out of stock"}}"#,
    ));
    let transport = backend.transport(None);

    let result = transport.send::<Value>(&ApiRequest::get(ORDER_PATH)).await;

    assert!(matches!(
        result,
        Err(TransportError::Remote { status: 400, ref message }) if message == "Item out of stock"
    ));
}

#[tokio::test]
async fn test_rate_limit_reports_retry_after() {
    let backend = backend().await;
    let mut failure = InjectedFailure::new(StatusCode::TOO_MANY_REQUESTS, "slow down");
    failure.retry_after = Some(7);
    backend.fail_next(failure);
    let transport = backend.transport(None);

    let result = transport.send::<Value>(&ApiRequest::get(ORDER_PATH)).await;

    assert!(matches!(result, Err(TransportError::RateLimited(7))));
}
