//! Customer session: the credential sent with backend requests.
//!
//! The transport only needs three things from a session: the current
//! credential, a way to silently revalidate it, and a way to force logout.
//! [`TokenSession`] is the in-memory implementation; how a fresh credential is
//! obtained is delegated to a [`CredentialRenewer`] because that handshake is
//! backend specific.

use std::sync::Arc;

use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock, broadcast};
use tracing::instrument;

/// Capacity of the session event channel.
const EVENT_CHANNEL_CAPACITY: usize = 16;

/// Errors from session revalidation.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The backend offers no silent revalidation.
    #[error("Silent revalidation is not supported by this backend")]
    NotSupported,

    /// The backend rejected the renewal attempt.
    #[error("Revalidation rejected: {0}")]
    Rejected(String),

    /// Renewal could not reach the backend.
    #[error("Revalidation failed: {0}")]
    Unavailable(String),
}

/// Session lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// A new credential replaced the previous one.
    Renewed,
    /// The credential was invalidated; cart state must be dropped.
    LoggedOut,
}

/// The contract the authenticated transport needs from a session.
#[async_trait]
pub trait Session: Send + Sync {
    /// Current credential, if signed in.
    async fn credential(&self) -> Option<SecretString>;

    /// Try to obtain a fresh credential without user interaction.
    ///
    /// # Errors
    ///
    /// Returns an error when revalidation is unsupported or rejected. The
    /// caller is responsible for forcing logout in that case.
    async fn revalidate(&self) -> Result<(), SessionError>;

    /// Invalidate the credential and notify listeners.
    async fn force_logout(&self);
}

/// A session credential with optional expiry.
#[derive(Debug, Clone)]
pub struct SessionToken {
    /// Credential value.
    pub value: SecretString,
    /// Unix timestamp when the credential expires, if known.
    pub expires_at: Option<i64>,
}

impl SessionToken {
    /// A credential with no known expiry.
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: SecretString::from(value.into()),
            expires_at: None,
        }
    }

    /// Check if the credential has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        self.expires_within(0)
    }

    /// Check if the credential will expire within the given number of seconds.
    #[must_use]
    pub fn expires_within(&self, seconds: i64) -> bool {
        self.expires_at.is_some_and(|expires_at| {
            let now = chrono::Utc::now().timestamp();
            now >= expires_at - seconds
        })
    }
}

/// Obtains a fresh credential for a session (e.g. by replaying a stored login).
#[async_trait]
pub trait CredentialRenewer: Send + Sync {
    /// Produce a new credential.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Rejected` if the backend refuses the renewal.
    async fn renew(&self) -> Result<SessionToken, SessionError>;
}

/// In-memory session holding a single credential.
#[derive(Clone)]
pub struct TokenSession {
    inner: Arc<TokenSessionInner>,
}

struct TokenSessionInner {
    token: RwLock<Option<SessionToken>>,
    renewer: Option<Arc<dyn CredentialRenewer>>,
    /// Serializes renewals so concurrent 401s share one handshake at a time.
    renewing: Mutex<()>,
    events: broadcast::Sender<SessionEvent>,
}

impl TokenSession {
    /// Create a session, optionally signed in and optionally renewable.
    #[must_use]
    pub fn new(token: Option<SessionToken>, renewer: Option<Arc<dyn CredentialRenewer>>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(TokenSessionInner {
                token: RwLock::new(token),
                renewer,
                renewing: Mutex::new(()),
                events,
            }),
        }
    }

    /// Subscribe to session lifecycle events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Replace the credential (after an interactive login).
    pub async fn sign_in(&self, token: SessionToken) {
        *self.inner.token.write().await = Some(token);
        let _ = self.inner.events.send(SessionEvent::Renewed);
    }

    /// Whether a credential is currently held.
    pub async fn is_signed_in(&self) -> bool {
        self.inner.token.read().await.is_some()
    }
}

#[async_trait]
impl Session for TokenSession {
    async fn credential(&self) -> Option<SecretString> {
        self.inner
            .token
            .read()
            .await
            .as_ref()
            .map(|token| token.value.clone())
    }

    #[instrument(skip(self))]
    async fn revalidate(&self) -> Result<(), SessionError> {
        let Some(renewer) = self.inner.renewer.as_ref() else {
            return Err(SessionError::NotSupported);
        };

        let _guard = self.inner.renewing.lock().await;
        let token = renewer.renew().await?;
        *self.inner.token.write().await = Some(token);
        let _ = self.inner.events.send(SessionEvent::Renewed);

        tracing::info!("Session credential renewed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn force_logout(&self) {
        *self.inner.token.write().await = None;
        // No receivers is fine: nothing holds cart state yet.
        let _ = self.inner.events.send(SessionEvent::LoggedOut);
        tracing::info!("Session logged out");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use secrecy::ExposeSecret;

    use super::*;

    struct CountingRenewer {
        calls: AtomicUsize,
        accept: bool,
    }

    #[async_trait]
    impl CredentialRenewer for CountingRenewer {
        async fn renew(&self) -> Result<SessionToken, SessionError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.accept {
                Ok(SessionToken::new(format!("renewed-{n}")))
            } else {
                Err(SessionError::Rejected("wrong credentials".to_string()))
            }
        }
    }

    #[test]
    fn test_token_expiry() {
        let now = chrono::Utc::now().timestamp();

        let expired = SessionToken {
            value: SecretString::from("t"),
            expires_at: Some(now - 3600),
        };
        assert!(expired.is_expired());

        let valid = SessionToken {
            value: SecretString::from("t"),
            expires_at: Some(now + 3600),
        };
        assert!(!valid.is_expired());
        assert!(valid.expires_within(7200));

        assert!(!SessionToken::new("t").is_expired());
    }

    #[tokio::test]
    async fn test_revalidate_without_renewer_is_unsupported() {
        let session = TokenSession::new(Some(SessionToken::new("abc")), None);
        let result = session.revalidate().await;
        assert!(matches!(result, Err(SessionError::NotSupported)));
        // Failure alone does not sign the user out.
        assert!(session.is_signed_in().await);
    }

    #[tokio::test]
    async fn test_revalidate_replaces_credential_and_notifies() {
        let renewer = Arc::new(CountingRenewer {
            calls: AtomicUsize::new(0),
            accept: true,
        });
        let session = TokenSession::new(Some(SessionToken::new("old")), Some(renewer.clone()));
        let mut events = session.subscribe();

        session.revalidate().await.unwrap();

        let credential = session.credential().await.unwrap();
        assert_eq!(credential.expose_secret(), "renewed-1");
        assert_eq!(events.recv().await.unwrap(), SessionEvent::Renewed);
        assert_eq!(renewer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_rejected_renewal_keeps_old_credential() {
        let renewer = Arc::new(CountingRenewer {
            calls: AtomicUsize::new(0),
            accept: false,
        });
        let session = TokenSession::new(Some(SessionToken::new("old")), Some(renewer));

        let result = session.revalidate().await;
        assert!(matches!(result, Err(SessionError::Rejected(_))));
        assert_eq!(session.credential().await.unwrap().expose_secret(), "old");
    }

    #[tokio::test]
    async fn test_force_logout_clears_and_broadcasts() {
        let session = TokenSession::new(Some(SessionToken::new("abc")), None);
        let mut events = session.subscribe();

        session.force_logout().await;

        assert!(session.credential().await.is_none());
        assert_eq!(events.recv().await.unwrap(), SessionEvent::LoggedOut);
    }
}
