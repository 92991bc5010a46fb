//! Remote cart gateway: the backend contract the sync engine depends on.
//!
//! # Architecture
//!
//! - The engine only sees [`RemoteCartGateway`]; wire shapes stay behind it
//! - [`OrderFormGateway`] is the REST implementation for order-form style
//!   checkout APIs, built on [`AuthenticatedTransport`](crate::transport::AuthenticatedTransport)
//! - Every call returns the authoritative cart so the engine can replace its
//!   local state wholesale
//!
//! # Example
//!
//! ```rust,ignore
//! use cartsync_storefront::gateway::{OrderFormGateway, RemoteCartGateway};
//!
//! let gateway = OrderFormGateway::new(transport);
//! let cart = gateway.fetch_current(&order_id).await?;
//! ```

mod order_form;

pub use order_form::OrderFormGateway;

use async_trait::async_trait;
use cartsync_core::{Cart, CartItem, LineId, OrderId, ProductId, SellerId};
use thiserror::Error;

use crate::transport::TransportError;

/// Errors returned by gateway implementations.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// There is no remote order to operate on.
    #[error("No active order")]
    NoActiveOrder,

    /// The transport failed (including authentication failures).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The backend answered with data the gateway cannot interpret.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

/// One line of a full-replace request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInput {
    /// Product (SKU) identifier.
    pub product_id: ProductId,
    /// Desired quantity.
    pub quantity: u32,
    /// Seller offering the product.
    pub seller: SellerId,
    /// Server line identifier, when the line is already confirmed.
    pub line_id: Option<LineId>,
}

impl From<&CartItem> for ItemInput {
    fn from(item: &CartItem) -> Self {
        Self {
            product_id: item.product.id.clone(),
            quantity: item.quantity,
            seller: item.seller.clone(),
            line_id: item.line.line_id().cloned(),
        }
    }
}

/// A quantity change for one server-confirmed line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineUpdate {
    /// Server index of the line.
    pub index: u32,
    /// Server line identifier.
    pub line_id: LineId,
    /// Requested quantity; zero removes the line.
    pub quantity: u32,
    /// Seller offering the product.
    pub seller: SellerId,
}

/// Backend operations the cart sync engine needs.
#[async_trait]
pub trait RemoteCartGateway: Send + Sync {
    /// Fetch the authoritative cart for an order.
    ///
    /// # Errors
    ///
    /// Returns `GatewayError::NoActiveOrder` if the order does not exist.
    async fn fetch_current(&self, order_id: &OrderId) -> Result<Cart, GatewayError>;

    /// Replace every item of the order with `items`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the request.
    async fn replace_items(
        &self,
        order_id: &OrderId,
        items: &[ItemInput],
    ) -> Result<Cart, GatewayError>;

    /// Change quantities of existing lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the request.
    async fn update_lines(
        &self,
        order_id: &OrderId,
        lines: &[LineUpdate],
    ) -> Result<Cart, GatewayError>;

    /// Change the quantity of one line and report the quantity the server
    /// actually accepted (stock may cap it).
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the request.
    async fn update_line(&self, order_id: &OrderId, line: &LineUpdate) -> Result<u32, GatewayError> {
        let cart = self
            .update_lines(order_id, std::slice::from_ref(line))
            .await?;
        Ok(accepted_quantity(&cart, &line.line_id))
    }
}

/// Quantity the server holds for a line. A line missing from the response no
/// longer exists, so its accepted quantity is zero.
#[must_use]
pub fn accepted_quantity(cart: &Cart, line_id: &LineId) -> u32 {
    cart.items
        .iter()
        .find(|item| item.line.line_id() == Some(line_id))
        .map_or(0, |item| item.quantity)
}

#[cfg(test)]
mod tests {
    use cartsync_core::{CurrencyCode, LineRef, Price, ProductRef};

    use super::*;

    fn line(id: &str, quantity: u32) -> CartItem {
        CartItem {
            line: LineRef::confirmed(id, 0),
            quantity,
            product: ProductRef::placeholder(ProductId::new(format!("sku-{id}"))),
            unit_price: Price::zero(CurrencyCode::USD),
            seller: SellerId::default(),
        }
    }

    #[test]
    fn test_accepted_quantity() {
        let cart = Cart {
            order_id: Some(OrderId::new("of")),
            items: vec![line("l1", 2)],
            subtotal: Price::zero(CurrencyCode::USD),
        };
        assert_eq!(accepted_quantity(&cart, &LineId::new("l1")), 2);
        assert_eq!(accepted_quantity(&cart, &LineId::new("gone")), 0);
    }

    #[test]
    fn test_item_input_carries_confirmed_line_id() {
        let confirmed = ItemInput::from(&line("l1", 3));
        assert_eq!(confirmed.line_id, Some(LineId::new("l1")));
        assert_eq!(confirmed.quantity, 3);

        let mut synthetic_item = line("l2", 1);
        synthetic_item.line = LineRef::synthetic();
        assert_eq!(ItemInput::from(&synthetic_item).line_id, None);
    }
}
