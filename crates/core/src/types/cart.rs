//! Cart entity and the local (optimistic) mutations applied to it.
//!
//! Every mutation here is pure: no I/O, no scheduling. The sync engine in
//! `cartsync-storefront` decides when a mutated cart is sent to the backend
//! and what happens when the backend disagrees.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::id::{LineId, OrderId, ProductId, SellerId};
use super::price::{CurrencyCode, Price};

/// Server index reported for lines the backend has not assigned yet.
pub const SYNTHETIC_INDEX: i64 = -1;

/// Display name used for optimistic lines until the server fills it in.
pub const PLACEHOLDER_NAME: &str = "Loading...";

/// Identity of a cart line.
///
/// Optimistic lines carry a locally generated placeholder until a
/// reconciliation replaces them with the server-assigned identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LineRef {
    /// Created locally, not yet confirmed by the server.
    Synthetic {
        /// Local placeholder id.
        placeholder: Uuid,
    },
    /// Assigned by the server.
    Confirmed {
        /// Server line identifier (unique id).
        id: LineId,
        /// Position of the line in the server's item list.
        index: u32,
    },
}

impl LineRef {
    /// A fresh synthetic line reference.
    #[must_use]
    pub fn synthetic() -> Self {
        Self::Synthetic {
            placeholder: Uuid::new_v4(),
        }
    }

    /// A server-confirmed line reference.
    #[must_use]
    pub fn confirmed(id: impl Into<LineId>, index: u32) -> Self {
        Self::Confirmed {
            id: id.into(),
            index,
        }
    }

    /// Whether the server has confirmed this line.
    #[must_use]
    pub const fn is_confirmed(&self) -> bool {
        matches!(self, Self::Confirmed { .. })
    }

    /// Server line identifier, if confirmed.
    #[must_use]
    pub const fn line_id(&self) -> Option<&LineId> {
        match self {
            Self::Confirmed { id, .. } => Some(id),
            Self::Synthetic { .. } => None,
        }
    }

    /// Server index, or [`SYNTHETIC_INDEX`] for unconfirmed lines.
    #[must_use]
    pub fn server_index(&self) -> i64 {
        match self {
            Self::Confirmed { index, .. } => i64::from(*index),
            Self::Synthetic { .. } => SYNTHETIC_INDEX,
        }
    }
}

/// Product snapshot shown on a cart line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRef {
    /// Product (SKU) identifier.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Image URL.
    pub image: Option<String>,
}

impl ProductRef {
    /// Placeholder snapshot used until the server returns real product data.
    #[must_use]
    pub fn placeholder(id: ProductId) -> Self {
        Self {
            id,
            name: PLACEHOLDER_NAME.to_owned(),
            image: None,
        }
    }
}

/// Known product data used to fill optimistic lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemSnapshot {
    /// Product snapshot.
    pub product: ProductRef,
    /// Unit price.
    pub unit_price: Price,
    /// Seller offering the product.
    pub seller: SellerId,
}

/// A line in the cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    /// Line identity (synthetic until confirmed).
    pub line: LineRef,
    /// Quantity. Zero is never stored; it means the line is removed.
    pub quantity: u32,
    /// Product snapshot.
    pub product: ProductRef,
    /// Unit price.
    pub unit_price: Price,
    /// Seller offering the product.
    #[serde(default)]
    pub seller: SellerId,
}

impl CartItem {
    /// Build an optimistic line for a product the server has not confirmed.
    #[must_use]
    pub fn optimistic(snapshot: ItemSnapshot, quantity: u32) -> Self {
        Self {
            line: LineRef::synthetic(),
            quantity,
            product: snapshot.product,
            unit_price: snapshot.unit_price,
            seller: snapshot.seller,
        }
    }

    /// Price of the whole line.
    #[must_use]
    pub fn line_total(&self) -> Price {
        self.unit_price.times(self.quantity)
    }

    /// Product snapshot of this line, for reuse by later optimistic adds.
    #[must_use]
    pub fn snapshot(&self) -> ItemSnapshot {
        ItemSnapshot {
            product: self.product.clone(),
            unit_price: self.unit_price,
            seller: self.seller.clone(),
        }
    }
}

/// A shopping cart.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cart {
    /// Remote order identifier. `None` means no active order exists yet.
    pub order_id: Option<OrderId>,
    /// Lines in server order.
    pub items: Vec<CartItem>,
    /// Sum of line totals.
    pub subtotal: Price,
}

impl Cart {
    /// An empty cart attached to an order.
    #[must_use]
    pub fn for_order(order_id: OrderId, currency_code: CurrencyCode) -> Self {
        Self {
            order_id: Some(order_id),
            items: Vec::new(),
            subtotal: Price::zero(currency_code),
        }
    }

    /// Currency the cart is priced in.
    #[must_use]
    pub const fn currency(&self) -> CurrencyCode {
        self.subtotal.currency_code
    }

    /// Find the line for a product.
    #[must_use]
    pub fn item(&self, product_id: &ProductId) -> Option<&CartItem> {
        self.items.iter().find(|item| &item.product.id == product_id)
    }

    fn item_mut(&mut self, product_id: &ProductId) -> Option<&mut CartItem> {
        self.items
            .iter_mut()
            .find(|item| &item.product.id == product_id)
    }

    /// Whether the cart has no lines.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines.
    #[must_use]
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|item| u64::from(item.quantity)).sum()
    }

    /// Whether every line carries a server-assigned identity.
    #[must_use]
    pub fn is_reconciled(&self) -> bool {
        self.items.iter().all(|item| item.line.is_confirmed())
    }

    /// Recompute the subtotal from line prices.
    pub fn recompute_subtotal(&mut self) {
        let currency = self.currency();
        self.subtotal = self
            .items
            .iter()
            .fold(Price::zero(currency), |acc, item| {
                Price::new(acc.amount + item.line_total().amount, currency)
            });
    }

    /// Add `quantity` units of a product.
    ///
    /// An existing line is incremented in place; otherwise a synthetic line
    /// is appended using `snapshot` (or a placeholder when nothing is known
    /// about the product yet).
    pub fn add(&mut self, product_id: &ProductId, quantity: u32, snapshot: Option<ItemSnapshot>) {
        if let Some(item) = self.item_mut(product_id) {
            item.quantity = item.quantity.saturating_add(quantity);
        } else {
            let currency = self.currency();
            let snapshot = snapshot.unwrap_or_else(|| ItemSnapshot {
                product: ProductRef::placeholder(product_id.clone()),
                unit_price: Price::zero(currency),
                seller: SellerId::default(),
            });
            self.items.push(CartItem::optimistic(snapshot, quantity));
        }
        self.recompute_subtotal();
    }

    /// Set the quantity of an existing line. Zero removes the line.
    ///
    /// Returns `false` if the product is not in the cart.
    pub fn set_quantity(&mut self, product_id: &ProductId, quantity: u32) -> bool {
        if quantity == 0 {
            return self.remove(product_id);
        }
        let Some(item) = self.item_mut(product_id) else {
            return false;
        };
        item.quantity = quantity;
        self.recompute_subtotal();
        true
    }

    /// Remove the line for a product.
    ///
    /// Returns `false` if the product is not in the cart.
    pub fn remove(&mut self, product_id: &ProductId) -> bool {
        let before = self.items.len();
        self.items.retain(|item| &item.product.id != product_id);
        let removed = self.items.len() != before;
        if removed {
            self.recompute_subtotal();
        }
        removed
    }

    /// Drop every line, keeping the order attachment.
    pub fn clear_items(&mut self) {
        self.items.clear();
        self.recompute_subtotal();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    fn confirmed_item(product: &str, quantity: u32, cents: i64) -> CartItem {
        CartItem {
            line: LineRef::confirmed(format!("line-{product}"), 0),
            quantity,
            product: ProductRef {
                id: ProductId::new(product),
                name: product.to_uppercase(),
                image: None,
            },
            unit_price: Price::from_cents(cents, CurrencyCode::USD),
            seller: SellerId::default(),
        }
    }

    fn cart_with(items: Vec<CartItem>) -> Cart {
        let mut cart = Cart::for_order(OrderId::new("of-1"), CurrencyCode::USD);
        cart.items = items;
        cart.recompute_subtotal();
        cart
    }

    #[test]
    fn test_add_existing_increments_in_place() {
        let mut cart = cart_with(vec![confirmed_item("a", 1, 1000)]);
        cart.add(&ProductId::new("a"), 1, None);

        assert_eq!(cart.items.len(), 1);
        assert_eq!(cart.items[0].quantity, 2);
        assert!(cart.items[0].line.is_confirmed());
        assert_eq!(cart.subtotal.amount, Decimal::new(20, 0));
    }

    #[test]
    fn test_add_new_appends_synthetic_placeholder() {
        let mut cart = cart_with(vec![confirmed_item("a", 1, 1000)]);
        cart.add(&ProductId::new("b"), 2, None);

        let item = cart.item(&ProductId::new("b")).unwrap();
        assert_eq!(item.quantity, 2);
        assert_eq!(item.line.server_index(), SYNTHETIC_INDEX);
        assert_eq!(item.product.name, PLACEHOLDER_NAME);
        assert!(!cart.is_reconciled());
        // Unknown price contributes nothing until the server answers.
        assert_eq!(cart.subtotal.amount, Decimal::new(10, 0));
    }

    #[test]
    fn test_add_new_uses_known_snapshot() {
        let mut cart = cart_with(vec![]);
        let snapshot = confirmed_item("c", 1, 250).snapshot();
        cart.add(&ProductId::new("c"), 4, Some(snapshot));

        let item = cart.item(&ProductId::new("c")).unwrap();
        assert_eq!(item.product.name, "C");
        assert_eq!(cart.subtotal.amount, Decimal::new(10, 0));
    }

    #[test]
    fn test_set_quantity_zero_removes() {
        let mut zeroed = cart_with(vec![confirmed_item("a", 3, 100), confirmed_item("b", 1, 100)]);
        let mut removed = zeroed.clone();

        assert!(zeroed.set_quantity(&ProductId::new("a"), 0));
        assert!(removed.remove(&ProductId::new("a")));
        assert_eq!(zeroed, removed);
        assert!(zeroed.item(&ProductId::new("a")).is_none());
    }

    #[test]
    fn test_set_quantity_unknown_product() {
        let mut cart = cart_with(vec![confirmed_item("a", 1, 100)]);
        assert!(!cart.set_quantity(&ProductId::new("zzz"), 5));
        assert!(!cart.remove(&ProductId::new("zzz")));
    }

    #[test]
    fn test_clear_items_keeps_order() {
        let mut cart = cart_with(vec![confirmed_item("a", 1, 100)]);
        cart.clear_items();
        assert!(cart.is_empty());
        assert!(cart.subtotal.is_zero());
        assert_eq!(cart.order_id, Some(OrderId::new("of-1")));
    }

    #[test]
    fn test_total_quantity() {
        let cart = cart_with(vec![confirmed_item("a", 2, 100), confirmed_item("b", 3, 100)]);
        assert_eq!(cart.total_quantity(), 5);
    }
}
