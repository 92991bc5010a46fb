//! Cart error handling with Sentry integration.
//!
//! [`CartError`] is what engine operations return. Failures that reach the
//! backend are captured to Sentry before they are surfaced to observers.

use cartsync_core::{ProductId, SyncError, SyncErrorKind};
use thiserror::Error;

use crate::gateway::GatewayError;

/// Errors surfaced by the cart sync engine.
#[derive(Debug, Error)]
pub enum CartError {
    /// The round trip to the backend failed; local changes were reverted.
    #[error("Cart sync failed: {0}")]
    SyncFailed(#[source] GatewayError),

    /// The session could not be renewed.
    #[error("Authentication required: {0}")]
    AuthenticationRequired(String),

    /// There is no remote order to sync against.
    #[error("No active order")]
    NoActiveOrder,

    /// Quantity must be positive.
    #[error("Invalid quantity {0}: must be at least 1")]
    InvalidQuantity(i64),

    /// The product has no line in the cart.
    #[error("Product {0} is not in the cart")]
    UnknownProduct(ProductId),
}

impl From<GatewayError> for CartError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::NoActiveOrder => Self::NoActiveOrder,
            GatewayError::Transport(transport) if transport.is_authentication() => {
                Self::AuthenticationRequired(transport.to_string())
            }
            other => Self::SyncFailed(other),
        }
    }
}

impl CartError {
    /// User-visible category, or `None` for local validation errors that
    /// never touch the backend.
    #[must_use]
    pub const fn kind(&self) -> Option<SyncErrorKind> {
        match self {
            Self::SyncFailed(_) => Some(SyncErrorKind::SyncFailed),
            Self::AuthenticationRequired(_) => Some(SyncErrorKind::AuthenticationRequired),
            Self::NoActiveOrder => Some(SyncErrorKind::NoActiveOrder),
            Self::InvalidQuantity(_) | Self::UnknownProduct(_) => None,
        }
    }

    /// Record for observers, if this error is a sync failure.
    #[must_use]
    pub fn to_sync_error(&self) -> Option<SyncError> {
        self.kind().map(|kind| SyncError::new(kind, self.to_string()))
    }
}

/// Report a sync failure.
///
/// Backend failures go to Sentry; authentication and missing-order errors
/// are expected user states and are only logged.
pub fn report(err: &CartError) {
    match err {
        CartError::SyncFailed(_) => {
            let event_id = sentry::capture_error(err);
            tracing::error!(
                error = %err,
                sentry_event_id = %event_id,
                "Cart sync failed, local changes reverted"
            );
        }
        CartError::AuthenticationRequired(_) | CartError::NoActiveOrder => {
            tracing::warn!(error = %err, "Cart sync rejected, local changes reverted");
        }
        CartError::InvalidQuantity(_) | CartError::UnknownProduct(_) => {
            tracing::debug!(error = %err, "Cart mutation rejected");
        }
    }
}

/// Add a breadcrumb for user actions.
///
/// Breadcrumbs appear in Sentry error reports to show the trail of cart
/// actions leading up to a sync failure.
///
/// # Example
///
/// ```rust,ignore
/// add_breadcrumb("cart", "Added item", Some(&[("product_id", "123")]));
/// ```
pub fn add_breadcrumb(category: &str, message: &str, data: Option<&[(&str, &str)]>) {
    let mut breadcrumb = sentry::Breadcrumb {
        category: Some(category.to_string()),
        message: Some(message.to_string()),
        level: sentry::Level::Info,
        ..Default::default()
    };

    if let Some(pairs) = data {
        for (key, value) in pairs {
            breadcrumb.data.insert(
                (*key).to_string(),
                serde_json::Value::String((*value).to_string()),
            );
        }
    }

    sentry::add_breadcrumb(breadcrumb);
}

/// Result type alias for `CartError`.
pub type Result<T> = std::result::Result<T, CartError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportError;

    #[test]
    fn test_cart_error_display() {
        let err = CartError::InvalidQuantity(-1);
        assert_eq!(err.to_string(), "Invalid quantity -1: must be at least 1");

        let err = CartError::UnknownProduct(ProductId::new("sku-1"));
        assert_eq!(err.to_string(), "Product sku-1 is not in the cart");
    }

    #[test]
    fn test_gateway_error_mapping() {
        let auth = CartError::from(GatewayError::Transport(
            TransportError::AuthenticationExhausted,
        ));
        assert_eq!(auth.kind(), Some(SyncErrorKind::AuthenticationRequired));

        let remote = CartError::from(GatewayError::Transport(TransportError::Remote {
            status: 500,
            message: "boom".to_string(),
        }));
        assert_eq!(remote.kind(), Some(SyncErrorKind::SyncFailed));

        let missing = CartError::from(GatewayError::NoActiveOrder);
        assert_eq!(missing.kind(), Some(SyncErrorKind::NoActiveOrder));
    }

    #[test]
    fn test_local_errors_have_no_sync_kind() {
        assert!(CartError::InvalidQuantity(0).to_sync_error().is_none());
        let sync = CartError::NoActiveOrder.to_sync_error();
        assert_eq!(sync.map(|e| e.kind), Some(SyncErrorKind::NoActiveOrder));
    }
}
