//! Cart sync engine: optimistic local cart kept consistent with the backend.
//!
//! # Architecture
//!
//! - Mutations apply to the local cart synchronously, publish a snapshot and
//!   arm a trailing debounce timer
//! - When the timer fires the whole item list is sent with
//!   [`RemoteCartGateway::replace_items`]; the answer becomes the new
//!   last-known-good cart
//! - Any failure restores the last-known-good cart verbatim
//! - One remote call is in flight at a time; the payload is read when the
//!   flight starts, so mutations made meanwhile ride the next call
//! - Responses that arrive after a logout are discarded
//!
//! ```text
//! Idle --mutation--> PendingSync --timer--> Syncing --ok--> Idle
//!                                                  \--err--> Reverting --> Idle
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! let engine = CartSyncEngine::new(Arc::new(gateway), SyncConfig::default());
//! engine.load(OrderId::new("of-1")).await?;
//! engine.add_item("sku-1", 2)?;
//! let mut updates = engine.observe();
//! engine.flush().await?;
//! ```

mod state;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use cartsync_core::{
    Cart, CartItem, CartSnapshot, CurrencyCode, ItemSnapshot, LineRef, OrderId, Price, ProductId,
    ProductRef, SyncError, SyncState,
};
use moka::sync::Cache;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::config::SyncConfig;
use crate::error::{CartError, Result, add_breadcrumb, report};
use crate::gateway::{ItemInput, LineUpdate, RemoteCartGateway, accepted_quantity};
use crate::session::SessionEvent;

use state::{EngineState, FlightTicket};

/// Maximum number of product snapshots remembered for optimistic adds.
const PRODUCT_CACHE_CAPACITY: u64 = 1000;

/// How long a product snapshot stays usable.
const PRODUCT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Outcome of [`CartSyncEngine::update_line_quantity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuantityUpdate {
    /// The line is not confirmed yet; the change rides the next debounced
    /// reconciliation.
    Deferred,
    /// The server accepted the change, possibly lowering the quantity.
    Confirmed {
        /// Quantity the server holds now.
        quantity: u32,
    },
}

/// Client-side cart consistency engine.
///
/// Cheap to clone; clones share state. Mutating methods must be called from
/// within a Tokio runtime because they schedule the reconciliation timer.
#[derive(Clone)]
pub struct CartSyncEngine {
    inner: Arc<EngineInner>,
}

struct EngineInner {
    gateway: Arc<dyn RemoteCartGateway>,
    config: SyncConfig,
    state: Mutex<EngineState>,
    /// Held for the duration of every remote call.
    flight: tokio::sync::Mutex<()>,
    snapshots: watch::Sender<CartSnapshot>,
    products: Cache<ProductId, ItemSnapshot>,
}

impl CartSyncEngine {
    /// Create an engine with an empty cart.
    #[must_use]
    pub fn new(gateway: Arc<dyn RemoteCartGateway>, config: SyncConfig) -> Self {
        Self::restore(gateway, config, Cart::default())
    }

    /// Create an engine from a previously persisted cart.
    ///
    /// The cart becomes both the visible and the last-known-good cart.
    #[must_use]
    pub fn restore(gateway: Arc<dyn RemoteCartGateway>, config: SyncConfig, cart: Cart) -> Self {
        let products = Cache::builder()
            .max_capacity(PRODUCT_CACHE_CAPACITY)
            .time_to_live(PRODUCT_CACHE_TTL)
            .build();
        let state = EngineState::new(cart);
        let (snapshots, _) = watch::channel(state.snapshot());

        let engine = Self {
            inner: Arc::new(EngineInner {
                gateway,
                config,
                state: Mutex::new(state),
                flight: tokio::sync::Mutex::new(()),
                snapshots,
                products,
            }),
        };
        let cart = engine.lock_state().last_known_good.clone();
        engine.remember_products(&cart);
        engine
    }

    // =========================================================================
    // Read access
    // =========================================================================

    /// Subscribe to state snapshots. The receiver starts with the current one.
    #[must_use]
    pub fn observe(&self) -> watch::Receiver<CartSnapshot> {
        self.inner.snapshots.subscribe()
    }

    /// Current state.
    #[must_use]
    pub fn snapshot(&self) -> CartSnapshot {
        self.lock_state().snapshot()
    }

    /// Visible cart, including unconfirmed changes.
    #[must_use]
    pub fn cart(&self) -> Cart {
        self.lock_state().cart.clone()
    }

    /// Last cart the server confirmed.
    #[must_use]
    pub fn last_known_good(&self) -> Cart {
        self.lock_state().last_known_good.clone()
    }

    /// Current sync state.
    #[must_use]
    pub fn sync_state(&self) -> SyncState {
        self.lock_state().sync_state
    }

    /// Last recorded failure.
    #[must_use]
    pub fn last_error(&self) -> Option<SyncError> {
        self.lock_state().last_error.clone()
    }

    // =========================================================================
    // Optimistic mutations
    // =========================================================================

    /// Add units of a product.
    ///
    /// # Errors
    ///
    /// Returns `CartError::InvalidQuantity` if `quantity` is not positive.
    pub fn add_item(&self, product_id: impl Into<ProductId>, quantity: i64) -> Result<()> {
        let product_id = product_id.into();
        let quantity = positive_quantity(quantity)?;

        add_breadcrumb(
            "cart",
            "Added item",
            Some(&[
                ("product_id", product_id.as_str()),
                ("quantity", &quantity.to_string()),
            ]),
        );

        self.mutate(|state| {
            let snapshot = self.optimistic_snapshot(&product_id, state.cart.currency());
            state.cart.add(&product_id, quantity, Some(snapshot));
            Ok(())
        })
    }

    /// Remove a product's line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::UnknownProduct` if the product is not in the cart.
    pub fn remove_item(&self, product_id: impl Into<ProductId>) -> Result<()> {
        let product_id = product_id.into();
        add_breadcrumb(
            "cart",
            "Removed item",
            Some(&[("product_id", product_id.as_str())]),
        );

        self.mutate(|state| {
            if state.cart.remove(&product_id) {
                Ok(())
            } else {
                Err(CartError::UnknownProduct(product_id.clone()))
            }
        })
    }

    /// Set a product's quantity. Zero or less removes the line.
    ///
    /// # Errors
    ///
    /// Returns `CartError::UnknownProduct` if the product is not in the cart.
    pub fn set_item_quantity(&self, product_id: impl Into<ProductId>, quantity: i64) -> Result<()> {
        let product_id = product_id.into();
        if quantity <= 0 {
            return self.remove_item(product_id);
        }
        let quantity = positive_quantity(quantity)?;

        add_breadcrumb(
            "cart",
            "Changed quantity",
            Some(&[
                ("product_id", product_id.as_str()),
                ("quantity", &quantity.to_string()),
            ]),
        );

        self.mutate(|state| {
            if state.cart.set_quantity(&product_id, quantity) {
                Ok(())
            } else {
                Err(CartError::UnknownProduct(product_id.clone()))
            }
        })
    }

    /// Apply a local mutation and schedule reconciliation.
    fn mutate<F>(&self, apply: F) -> Result<()>
    where
        F: FnOnce(&mut EngineState) -> Result<()>,
    {
        let generation = {
            let mut state = self.lock_state();
            apply(&mut state)?;
            state.revision += 1;
            let generation = state.arm_debounce();
            self.publish(&state);
            generation
        };
        self.schedule_reconcile(generation);
        Ok(())
    }

    fn schedule_reconcile(&self, generation: u64) {
        let deadline = tokio::time::Instant::now() + self.inner.config.debounce;
        let engine = Arc::downgrade(&self.inner);

        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(engine) = upgrade(&engine) else {
                return;
            };
            let current = engine.lock_state().pending == Some(generation);
            if !current {
                return;
            }
            // Failures are recorded in the state and reported already.
            let _ = engine.reconcile(Some(generation)).await;
        });
    }

    // =========================================================================
    // Remote operations
    // =========================================================================

    /// Run a pending reconciliation now and wait for it.
    ///
    /// With nothing pending this waits for any in-flight call to finish.
    ///
    /// # Errors
    ///
    /// Returns the reconciliation failure; local state has been reverted.
    #[instrument(skip(self))]
    pub async fn flush(&self) -> Result<()> {
        self.reconcile(None).await
    }

    /// Send the whole local item list and adopt the server's answer.
    ///
    /// The debounce slot is claimed only once the flight lock is held, so a
    /// failure of the previous flight (which cancels the slot) stops it.
    /// `None` claims whatever is pending.
    #[instrument(skip(self))]
    async fn reconcile(&self, generation: Option<u64>) -> Result<()> {
        let _flight = self.inner.flight.lock().await;

        let (order_id, items, ticket) = {
            let mut state = self.lock_state();
            let claimed = match generation {
                Some(generation) => state.claim_debounce(generation),
                None => state.claim_pending(),
            };
            if !claimed {
                return Ok(());
            }
            state.sync_state = SyncState::Syncing;
            self.publish(&state);
            let items: Vec<ItemInput> = state.cart.items.iter().map(ItemInput::from).collect();
            (state.cart.order_id.clone(), items, state.ticket())
        };

        let Some(order_id) = order_id else {
            return Err(self.fail(CartError::NoActiveOrder, ticket));
        };

        debug!(order_id = %order_id, lines = items.len(), "Reconciling cart");
        match self.inner.gateway.replace_items(&order_id, &items).await {
            Ok(confirmed) => {
                self.confirm(confirmed, ticket);
                Ok(())
            }
            Err(e) => Err(self.fail(e.into(), ticket)),
        }
    }

    /// Change one confirmed line directly on the server.
    ///
    /// The change is applied locally first; the server-accepted quantity
    /// (stock may lower it) then replaces it in both the visible and the
    /// last-known-good cart. The line is addressed by its position in the
    /// last-known-good cart as of when the call starts. Unconfirmed lines
    /// fall back to the debounced path.
    ///
    /// # Errors
    ///
    /// Returns `CartError::UnknownProduct` if the product is not in the cart,
    /// or the remote failure after local state has been reverted.
    #[instrument(skip(self, product_id))]
    pub async fn update_line_quantity(
        &self,
        product_id: impl Into<ProductId>,
        quantity: i64,
    ) -> Result<QuantityUpdate> {
        let product_id = product_id.into();
        let requested = if quantity <= 0 {
            0
        } else {
            positive_quantity(quantity)?
        };

        let confirmed = {
            let state = self.lock_state();
            let item = state
                .cart
                .item(&product_id)
                .ok_or_else(|| CartError::UnknownProduct(product_id.clone()))?;
            item.line.is_confirmed()
        };
        if !confirmed {
            self.set_item_quantity(product_id, quantity)?;
            return Ok(QuantityUpdate::Deferred);
        }

        add_breadcrumb(
            "cart",
            "Changed line quantity",
            Some(&[
                ("product_id", product_id.as_str()),
                ("quantity", &requested.to_string()),
            ]),
        );

        {
            let mut state = self.lock_state();
            state.cart.set_quantity(&product_id, requested);
            state.revision += 1;
            self.publish(&state);
        }

        let flight = self.inner.flight.lock().await;
        let (order_id, line, ticket) = {
            let mut state = self.lock_state();
            let line = state
                .last_known_good
                .item(&product_id)
                .and_then(|item| confirmed_line(item, requested));
            if line.is_some() {
                state.sync_state = SyncState::Syncing;
                self.publish(&state);
            }
            (state.last_known_good.order_id.clone(), line, state.ticket())
        };

        let Some(line) = line else {
            // The server no longer holds the line; let a full replace sort it out.
            drop(flight);
            self.mutate(|state| {
                state.cart.set_quantity(&product_id, requested);
                Ok(())
            })?;
            return Ok(QuantityUpdate::Deferred);
        };
        let Some(order_id) = order_id else {
            return Err(self.fail(CartError::NoActiveOrder, ticket));
        };

        let server = match self
            .inner
            .gateway
            .update_lines(&order_id, std::slice::from_ref(&line))
            .await
        {
            Ok(server) => server,
            Err(e) => return Err(self.fail(e.into(), ticket)),
        };
        let accepted = accepted_quantity(&server, &line.line_id);
        self.remember_products(&server);

        let mut state = self.lock_state();
        if state.epoch != ticket.epoch {
            debug!("Discarding line update that finished after logout");
            return Ok(QuantityUpdate::Confirmed { quantity: accepted });
        }
        state.adopt_line(server, &product_id, accepted, ticket);
        self.publish(&state);

        if accepted != requested {
            info!(requested, accepted, "Server adjusted line quantity");
        }
        Ok(QuantityUpdate::Confirmed { quantity: accepted })
    }

    /// Empty the cart on the server.
    ///
    /// Local items disappear immediately. The server cart is fetched, every
    /// line is zeroed and the result is fetched again as confirmation; an
    /// already empty server cart needs no mutating call.
    ///
    /// # Errors
    ///
    /// Returns the remote failure after local state has been reverted.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<()> {
        add_breadcrumb("cart", "Cleared cart", None);
        {
            let mut state = self.lock_state();
            state.cart.clear_items();
            state.cancel_debounce();
            state.revision += 1;
            self.publish(&state);
        }

        let _flight = self.inner.flight.lock().await;
        let (order_id, ticket) = {
            let mut state = self.lock_state();
            state.sync_state = SyncState::Syncing;
            self.publish(&state);
            let order_id = state
                .cart
                .order_id
                .clone()
                .or_else(|| state.last_known_good.order_id.clone());
            (order_id, state.ticket())
        };

        let Some(order_id) = order_id else {
            return Err(self.fail(CartError::NoActiveOrder, ticket));
        };

        match self.clear_remote(&order_id).await {
            Ok(confirmed) => {
                self.confirm(confirmed, ticket);
                Ok(())
            }
            Err(e) => Err(self.fail(e, ticket)),
        }
    }

    async fn clear_remote(&self, order_id: &OrderId) -> Result<Cart> {
        let gateway = &self.inner.gateway;
        let current = gateway.fetch_current(order_id).await?;
        if current.is_empty() {
            debug!("Server cart already empty");
            return Ok(current);
        }

        let zeroed: Vec<LineUpdate> = current
            .items
            .iter()
            .filter_map(|item| confirmed_line(item, 0))
            .collect();

        gateway.update_lines(order_id, &zeroed).await?;
        Ok(gateway.fetch_current(order_id).await?)
    }

    /// Replace local state with the server's cart for `order_id`.
    ///
    /// Pending local changes are dropped.
    ///
    /// # Errors
    ///
    /// Returns `CartError::NoActiveOrder` if the order does not exist, or the
    /// remote failure. Local state is left untouched on failure.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn load(&self, order_id: OrderId) -> Result<Cart> {
        let _flight = self.inner.flight.lock().await;
        let epoch = self.lock_state().epoch;

        match self.inner.gateway.fetch_current(&order_id).await {
            Ok(cart) => {
                self.remember_products(&cart);
                let mut state = self.lock_state();
                if state.epoch != epoch {
                    debug!("Discarding cart loaded across logout");
                    return Ok(cart);
                }
                state.cart = cart.clone();
                state.last_known_good = cart.clone();
                state.revision += 1;
                state.cancel_debounce();
                state.last_error = None;
                state.sync_state = SyncState::Idle;
                self.publish(&state);
                info!(lines = cart.items.len(), "Cart loaded");
                Ok(cart)
            }
            Err(e) => {
                let err = CartError::from(e);
                report(&err);
                let mut state = self.lock_state();
                state.last_error = err.to_sync_error();
                self.publish(&state);
                Err(err)
            }
        }
    }

    // =========================================================================
    // Errors and session
    // =========================================================================

    /// Clear the last recorded failure.
    pub fn dismiss_error(&self) {
        let mut state = self.lock_state();
        if state.last_error.take().is_some() {
            self.publish(&state);
        }
    }

    /// Drop all cart state after the customer logged out.
    ///
    /// Responses to calls already in flight are discarded when they arrive.
    pub fn handle_logout(&self) {
        let mut state = self.lock_state();
        state.logout();
        self.publish(&state);
        info!("Cart cleared after logout");
    }

    /// React to session events until the channel closes.
    pub fn watch_session(&self, mut events: broadcast::Receiver<SessionEvent>) -> JoinHandle<()> {
        let engine = Arc::downgrade(&self.inner);
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(SessionEvent::LoggedOut) => {
                        let Some(engine) = upgrade(&engine) else {
                            return;
                        };
                        engine.handle_logout();
                    }
                    Ok(SessionEvent::Renewed) => debug!("Session renewed"),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Missed session events");
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        })
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn confirm(&self, confirmed: Cart, ticket: FlightTicket) {
        self.remember_products(&confirmed);
        let mut state = self.lock_state();
        if state.epoch != ticket.epoch {
            debug!("Discarding response that finished after logout");
            return;
        }
        state.confirm(confirmed, ticket);
        self.publish(&state);
    }

    /// Revert to the last confirmed cart and record `err`.
    fn fail(&self, err: CartError, ticket: FlightTicket) -> CartError {
        report(&err);
        let mut state = self.lock_state();
        if state.epoch != ticket.epoch {
            // The carts were cleared by logout; only the reason survives.
            state.last_error = err.to_sync_error();
            state.sync_state = SyncState::Idle;
            self.publish(&state);
            return err;
        }

        state.sync_state = SyncState::Reverting;
        self.publish(&state);
        state.revert(err.to_sync_error());
        self.publish(&state);
        err
    }

    fn optimistic_snapshot(&self, product_id: &ProductId, currency: CurrencyCode) -> ItemSnapshot {
        self.inner
            .products
            .get(product_id)
            .unwrap_or_else(|| ItemSnapshot {
                product: ProductRef::placeholder(product_id.clone()),
                unit_price: Price::zero(currency),
                seller: self.inner.config.seller.clone(),
            })
    }

    fn remember_products(&self, cart: &Cart) {
        for item in cart.items.iter().filter(|item| item.line.is_confirmed()) {
            self.inner
                .products
                .insert(item.product.id.clone(), item.snapshot());
        }
    }

    fn publish(&self, state: &EngineState) {
        self.inner.snapshots.send_replace(state.snapshot());
    }

    fn lock_state(&self) -> MutexGuard<'_, EngineState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn upgrade(engine: &Weak<EngineInner>) -> Option<CartSyncEngine> {
    engine.upgrade().map(|inner| CartSyncEngine { inner })
}

fn confirmed_line(item: &CartItem, quantity: u32) -> Option<LineUpdate> {
    match &item.line {
        LineRef::Confirmed { id, index } => Some(LineUpdate {
            index: *index,
            line_id: id.clone(),
            quantity,
            seller: item.seller.clone(),
        }),
        LineRef::Synthetic { .. } => None,
    }
}

fn positive_quantity(quantity: i64) -> Result<u32> {
    u32::try_from(quantity)
        .ok()
        .filter(|q| *q > 0)
        .ok_or(CartError::InvalidQuantity(quantity))
}
