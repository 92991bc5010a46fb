//! Mutable engine state guarded by the engine's state lock.

use cartsync_core::{Cart, CartSnapshot, ProductId, SyncError, SyncState};

/// Everything the engine mutates. Only touched inside short critical
/// sections; never held across `.await`.
#[derive(Debug, Default)]
pub(super) struct EngineState {
    /// Visible cart, including unconfirmed mutations.
    pub cart: Cart,
    /// Last cart the server confirmed. Rollback target.
    pub last_known_good: Cart,
    pub sync_state: SyncState,
    pub last_error: Option<SyncError>,
    /// Bumped by every local mutation.
    pub revision: u64,
    /// Bumped on logout; responses from an older epoch are discarded.
    pub epoch: u64,
    /// Generation counter for debounce timers.
    pub debounce_gen: u64,
    /// Generation of the timer allowed to fire, if one is pending.
    pub pending: Option<u64>,
}

/// What a flight captured when it started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct FlightTicket {
    pub epoch: u64,
    pub revision: u64,
}

impl EngineState {
    pub fn new(cart: Cart) -> Self {
        Self {
            last_known_good: cart.clone(),
            cart,
            ..Self::default()
        }
    }

    pub fn snapshot(&self) -> CartSnapshot {
        CartSnapshot {
            cart: self.cart.clone(),
            sync_state: self.sync_state,
            last_error: self.last_error.clone(),
        }
    }

    pub const fn ticket(&self) -> FlightTicket {
        FlightTicket {
            epoch: self.epoch,
            revision: self.revision,
        }
    }

    /// Start a new debounce generation and return it.
    ///
    /// A call already in flight keeps the state at `Syncing`; settling
    /// afterwards moves it to `PendingSync`.
    pub fn arm_debounce(&mut self) -> u64 {
        self.debounce_gen += 1;
        self.pending = Some(self.debounce_gen);
        if self.sync_state != SyncState::Syncing {
            self.sync_state = SyncState::PendingSync;
        }
        self.debounce_gen
    }

    /// Claim the pending timer if `generation` is still current.
    pub fn claim_debounce(&mut self, generation: u64) -> bool {
        if self.pending == Some(generation) {
            self.pending = None;
            true
        } else {
            false
        }
    }

    /// Claim whatever timer is pending.
    pub const fn claim_pending(&mut self) -> bool {
        self.pending.take().is_some()
    }

    /// Drop any pending timer.
    pub const fn cancel_debounce(&mut self) {
        self.pending = None;
    }

    /// Idle unless another reconciliation is already scheduled.
    pub const fn settle_state(&mut self) {
        self.sync_state = if self.pending.is_some() {
            SyncState::PendingSync
        } else {
            SyncState::Idle
        };
    }

    /// Restore the last confirmed cart and drop pending work.
    pub fn revert(&mut self, error: Option<SyncError>) {
        self.cart = self.last_known_good.clone();
        self.cancel_debounce();
        self.last_error = error;
        self.sync_state = SyncState::Idle;
    }

    /// Adopt a server-confirmed cart.
    ///
    /// The visible cart is only replaced if nothing changed locally since
    /// `ticket` was taken; otherwise the newer mutations stay visible and the
    /// next scheduled call carries them.
    pub fn confirm(&mut self, confirmed: Cart, ticket: FlightTicket) {
        if self.revision == ticket.revision {
            self.cart = confirmed.clone();
        }
        self.last_known_good = confirmed;
        self.last_error = None;
        self.settle_state();
    }

    /// Adopt the server cart returned by a single-line update.
    ///
    /// With no other change made or scheduled since `ticket` the visible
    /// cart becomes the server cart, which also settles lines a concurrent
    /// reconciliation left unconfirmed. Otherwise only the line's quantity
    /// is patched and the pending reconciliation carries the rest.
    pub fn adopt_line(
        &mut self,
        server: Cart,
        product_id: &ProductId,
        accepted: u32,
        ticket: FlightTicket,
    ) {
        if self.pending.is_none() && self.revision == ticket.revision {
            self.cart = server.clone();
        } else {
            self.cart.set_quantity(product_id, accepted);
        }
        self.last_known_good = server;
        self.last_error = None;
        self.settle_state();
    }

    /// Forget everything tied to the signed-in customer.
    pub fn logout(&mut self) {
        self.epoch += 1;
        self.revision += 1;
        self.cart = Cart::default();
        self.last_known_good = Cart::default();
        self.cancel_debounce();
        self.sync_state = SyncState::Idle;
    }
}
