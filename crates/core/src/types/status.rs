//! Synchronization status types published to cart observers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::cart::Cart;

/// Where the engine is in its sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// Local state matches the last confirmed server state, or nothing is scheduled.
    #[default]
    Idle,
    /// Local mutations are waiting for the debounce window to elapse.
    PendingSync,
    /// A remote call is in flight.
    Syncing,
    /// A remote call failed and local state is being restored.
    Reverting,
}

impl SyncState {
    /// Whether the UI should present the cart as "syncing".
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::PendingSync | Self::Syncing)
    }
}

/// Category of a user-visible sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncErrorKind {
    /// The round trip failed; local changes were reverted.
    SyncFailed,
    /// The session could not be renewed; the user must sign in again.
    AuthenticationRequired,
    /// There is no remote order to sync against.
    NoActiveOrder,
}

/// Last sync failure, kept until dismissed or superseded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncError {
    /// Failure category.
    pub kind: SyncErrorKind,
    /// Human-readable description.
    pub message: String,
    /// When the failure was recorded.
    pub occurred_at: DateTime<Utc>,
}

impl SyncError {
    /// Record a failure now.
    #[must_use]
    pub fn new(kind: SyncErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            occurred_at: Utc::now(),
        }
    }
}

/// Read-only view of the engine state delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CartSnapshot {
    /// Visible cart, including unconfirmed optimistic changes.
    pub cart: Cart,
    /// Current sync state.
    pub sync_state: SyncState,
    /// Last failure, if not yet dismissed.
    pub last_error: Option<SyncError>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_state_busy() {
        assert!(!SyncState::Idle.is_busy());
        assert!(SyncState::PendingSync.is_busy());
        assert!(SyncState::Syncing.is_busy());
        assert!(!SyncState::Reverting.is_busy());
    }

    #[test]
    fn test_default_snapshot_is_idle_and_empty() {
        let snapshot = CartSnapshot::default();
        assert_eq!(snapshot.sync_state, SyncState::Idle);
        assert!(snapshot.cart.is_empty());
        assert!(snapshot.cart.order_id.is_none());
        assert!(snapshot.last_error.is_none());
    }
}
