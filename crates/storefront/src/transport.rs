//! Authenticated HTTP transport.
//!
//! Every backend call goes through [`AuthenticatedTransport::send`], which
//! attaches the session credential and survives credential expiry:
//!
//! ```text
//! Authorized --401--> Revalidating --ok--> Authorized (retry once)
//!                                  \--err--> LoggedOut
//! Authorized (retry) --401--> LoggedOut
//! ```
//!
//! `LoggedOut` is terminal for the call chain; the session must be signed in
//! again before further calls succeed.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use reqwest::header::{AUTHORIZATION, COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::instrument;

use crate::config::BackendConfig;
use crate::session::Session;

/// Header carrying the application key.
const APP_KEY_HEADER: &str = "x-vtex-api-appkey";

/// Header carrying the application token.
const APP_TOKEN_HEADER: &str = "x-vtex-api-apptoken";

/// Default header used for the customer credential.
const DEFAULT_CREDENTIAL_HEADER: &str = "VtexIdclientAutCookie";

/// Maximum number of body characters written to logs.
const LOG_BODY_LIMIT: usize = 500;

/// Errors produced by the authenticated transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The backend demanded authentication and no session was supplied.
    #[error("Authentication required but no session is available")]
    AuthenticationUnavailable,

    /// Silent revalidation was rejected or unsupported; the session was logged out.
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// The retried request was rejected again; the session was logged out.
    #[error("Authentication rejected after revalidation")]
    AuthenticationExhausted,

    /// The backend answered with a non-success status.
    #[error("API error (status {status}): {message}")]
    Remote {
        /// HTTP status code.
        status: u16,
        /// Best-effort error message from the response body.
        message: String,
    },

    /// Rate limited by the backend.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not the expected JSON.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// A configured header value cannot be sent.
    #[error("Invalid header value: {0}")]
    InvalidHeader(String),
}

impl TransportError {
    /// Whether this error means the user must authenticate again.
    #[must_use]
    pub const fn is_authentication(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationUnavailable
                | Self::AuthenticationFailed(_)
                | Self::AuthenticationExhausted
        )
    }
}

/// How the customer credential is attached to outbound requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialScheme {
    /// `Authorization: Bearer <token>`.
    Bearer,
    /// `<name>: <token>`.
    Header(String),
    /// Cookie `<name>=<token>`.
    Cookie(String),
}

impl Default for CredentialScheme {
    fn default() -> Self {
        Self::Header(DEFAULT_CREDENTIAL_HEADER.to_string())
    }
}

impl fmt::Display for CredentialScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bearer => f.write_str("bearer"),
            Self::Header(name) => write!(f, "header:{name}"),
            Self::Cookie(name) => write!(f, "cookie:{name}"),
        }
    }
}

impl FromStr for CredentialScheme {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("bearer") {
            return Ok(Self::Bearer);
        }
        match s.split_once(':') {
            Some((kind, name)) if !name.trim().is_empty() => {
                let name = name.trim().to_string();
                match kind.trim().to_ascii_lowercase().as_str() {
                    "header" => Ok(Self::Header(name)),
                    "cookie" => Ok(Self::Cookie(name)),
                    other => Err(format!("unknown credential scheme '{other}'")),
                }
            }
            _ => Err(format!(
                "expected 'bearer', 'header:<name>' or 'cookie:<name>', got '{s}'"
            )),
        }
    }
}

/// Per-request authentication bookkeeping. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AuthAttempt {
    /// Whether this attempt is the single retry after revalidation.
    pub is_retry: bool,
}

impl AuthAttempt {
    const RETRY: Self = Self { is_retry: true };
}

/// A re-issuable backend request.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    body: Option<serde_json::Value>,
    cookies: Vec<String>,
}

impl ApiRequest {
    /// A `GET` request for `path` (relative to the backend base URL).
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            body: None,
            cookies: Vec::new(),
        }
    }

    /// A `POST` request with a JSON body.
    #[must_use]
    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            body: Some(body),
            cookies: Vec::new(),
        }
    }

    /// Attach a cookie (`name=value`) to the request.
    #[must_use]
    pub fn with_cookie(mut self, cookie: impl Into<String>) -> Self {
        self.cookies.push(cookie.into());
        self
    }

    /// Request path.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// HTTP transport that injects credentials and drives session revalidation.
#[derive(Clone)]
pub struct AuthenticatedTransport {
    inner: Arc<TransportInner>,
}

struct TransportInner {
    client: reqwest::Client,
    base_url: String,
    static_headers: HeaderMap,
    scheme: CredentialScheme,
    session: Option<Arc<dyn Session>>,
}

impl AuthenticatedTransport {
    /// Create a transport for the configured backend.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built or a configured
    /// header value is not valid.
    pub fn new(
        config: &BackendConfig,
        session: Option<Arc<dyn Session>>,
    ) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        let mut static_headers = HeaderMap::new();
        if let Some(app_key) = &config.app_key {
            insert_header(&mut static_headers, APP_KEY_HEADER, app_key)?;
        }
        if let Some(app_token) = &config.app_token {
            insert_header(&mut static_headers, APP_TOKEN_HEADER, app_token.expose_secret())?;
        }

        Ok(Self {
            inner: Arc::new(TransportInner {
                client,
                base_url: config.base_url.as_str().trim_end_matches('/').to_string(),
                static_headers,
                scheme: config.credential_scheme.clone(),
                session,
            }),
        })
    }

    /// The session this transport authenticates with, if any.
    #[must_use]
    pub fn session(&self) -> Option<&Arc<dyn Session>> {
        self.inner.session.as_ref()
    }

    /// Send a request and parse the JSON response.
    ///
    /// A 401 triggers at most one revalidation and one retry.
    ///
    /// # Errors
    ///
    /// Returns one of the authentication errors when the session cannot be
    /// (re)established, `Remote` for other non-success statuses, and
    /// `Http`/`Parse` for transport or decoding failures.
    #[instrument(skip(self, request), fields(method = %request.method, path = %request.path))]
    pub async fn send<T: DeserializeOwned>(&self, request: &ApiRequest) -> Result<T, TransportError> {
        let mut attempt = AuthAttempt::default();

        loop {
            let response = self.dispatch(request).await?;

            if response.status() == StatusCode::UNAUTHORIZED {
                self.recover_from_unauthorized(attempt).await?;
                attempt = AuthAttempt::RETRY;
                continue;
            }

            return read_response(response).await;
        }
    }

    /// Decide whether a 401 may be retried, revalidating the session if so.
    ///
    /// `Ok(())` means the caller should re-issue the request exactly once.
    async fn recover_from_unauthorized(&self, attempt: AuthAttempt) -> Result<(), TransportError> {
        let Some(session) = self.inner.session.as_ref() else {
            tracing::warn!("401 received but no session is available to revalidate");
            return Err(TransportError::AuthenticationUnavailable);
        };

        if attempt.is_retry {
            tracing::warn!("401 received on retried request, forcing logout");
            session.force_logout().await;
            return Err(TransportError::AuthenticationExhausted);
        }

        tracing::info!("401 received, revalidating session");
        match session.revalidate().await {
            Ok(()) => {
                tracing::info!("Session revalidated, retrying request");
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "Session revalidation failed, forcing logout");
                session.force_logout().await;
                Err(TransportError::AuthenticationFailed(e.to_string()))
            }
        }
    }

    async fn dispatch(&self, request: &ApiRequest) -> Result<reqwest::Response, TransportError> {
        let url = format!("{}{}", self.inner.base_url, request.path);

        let mut builder = self
            .inner
            .client
            .request(request.method.clone(), &url)
            .headers(self.inner.static_headers.clone())
            .header("Accept", "application/json");

        let mut cookies = request.cookies.clone();
        if let Some(session) = self.inner.session.as_ref()
            && let Some(credential) = session.credential().await
        {
            match &self.inner.scheme {
                CredentialScheme::Bearer => {
                    builder = builder.header(
                        AUTHORIZATION,
                        format!("Bearer {}", credential.expose_secret()),
                    );
                }
                CredentialScheme::Header(name) => {
                    builder = builder.header(name.as_str(), credential.expose_secret());
                }
                CredentialScheme::Cookie(name) => {
                    cookies.push(credential_cookie(name, &credential));
                }
            }
        }

        if !cookies.is_empty() {
            builder = builder.header(COOKIE, cookies.join("; "));
        }

        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        Ok(builder.send().await?)
    }
}

fn insert_header(
    headers: &mut HeaderMap,
    name: &'static str,
    value: &str,
) -> Result<(), TransportError> {
    let value = HeaderValue::from_str(value)
        .map_err(|e| TransportError::InvalidHeader(format!("{name}: {e}")))?;
    headers.insert(HeaderName::from_static(name), value);
    Ok(())
}

fn credential_cookie(name: &str, credential: &SecretString) -> String {
    format!("{name}={}", credential.expose_secret())
}

async fn read_response<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, TransportError> {
    let status = response.status();

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(1);
        return Err(TransportError::RateLimited(retry_after));
    }

    // Read as text first for better error diagnostics
    let response_text = response.text().await?;

    if !status.is_success() {
        tracing::error!(
            status = %status,
            body = %truncate(&response_text, LOG_BODY_LIMIT),
            "Backend returned non-success status"
        );
        return Err(TransportError::Remote {
            status: status.as_u16(),
            message: remote_error_message(status, &response_text),
        });
    }

    if response_text.trim().is_empty() {
        return Ok(serde_json::from_value(serde_json::Value::Null)?);
    }

    serde_json::from_str(&response_text).map_err(|e| {
        tracing::error!(
            error = %e,
            body = %truncate(&response_text, LOG_BODY_LIMIT),
            "Failed to parse backend response"
        );
        TransportError::Parse(e)
    })
}

/// Extract a readable message from an error body.
///
/// Structured bodies yield their `message` (or nested `error.message`);
/// anything that is not JSON becomes a synthetic message instead of a parse
/// error.
fn remote_error_message(status: StatusCode, body: &str) -> String {
    let Ok(value) = serde_json::from_str::<serde_json::Value>(body) else {
        return format!(
            "Unknown error, status {}. Could not parse JSON.",
            status.as_u16()
        );
    };

    let message = value
        .get("message")
        .and_then(serde_json::Value::as_str)
        .or_else(|| {
            value
                .get("error")
                .and_then(|e| e.get("message").or(Some(e)))
                .and_then(serde_json::Value::as_str)
        });

    message.map_or_else(|| value.to_string(), str::to_string)
}

fn truncate(s: &str, limit: usize) -> String {
    s.chars().take(limit).collect()
}
