//! REST gateway for order-form style checkout APIs.
//!
//! ```text
//! GET  /api/checkout/pub/orderForm/{id}
//! POST /api/checkout/pub/orderForm/{id}/items          (full replace)
//! POST /api/checkout/pub/orderForm/{id}/items/update   (per line)
//! ```

mod conversions;
mod types;

use async_trait::async_trait;
use cartsync_core::{Cart, OrderId};
use serde::Serialize;
use tracing::{debug, instrument};

use super::{GatewayError, ItemInput, LineUpdate, RemoteCartGateway};
use crate::transport::{ApiRequest, AuthenticatedTransport, TransportError};

use conversions::{convert_order_form, replace_item, update_item};
use types::{ORDER_FORM_COOKIE, OrderForm, ReplaceItemsBody, UpdateItemsBody};

const ORDER_FORM_PATH: &str = "/api/checkout/pub/orderForm";

/// [`RemoteCartGateway`] backed by the checkout order-form API.
#[derive(Clone)]
pub struct OrderFormGateway {
    transport: AuthenticatedTransport,
}

impl OrderFormGateway {
    /// Create a gateway that sends every call through `transport`.
    #[must_use]
    pub const fn new(transport: AuthenticatedTransport) -> Self {
        Self { transport }
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &AuthenticatedTransport {
        &self.transport
    }

    async fn call(&self, order_id: &OrderId, request: ApiRequest) -> Result<Cart, GatewayError> {
        let request = request.with_cookie(format!("{ORDER_FORM_COOKIE}=__ofid={order_id}"));

        let form: OrderForm = self.transport.send(&request).await.map_err(|e| match e {
            TransportError::Remote { status: 404, .. } => GatewayError::NoActiveOrder,
            other => GatewayError::from(other),
        })?;

        if form.order_form_id.is_empty() {
            return Err(GatewayError::UnexpectedResponse(
                "order form without id".to_string(),
            ));
        }
        if form.order_form_id != order_id.as_str() {
            debug!(
                requested = %order_id,
                returned = %form.order_form_id,
                "Backend answered with a different order form"
            );
        }

        Ok(convert_order_form(form))
    }
}

fn order_path(order_id: &OrderId, suffix: &str) -> String {
    format!("{ORDER_FORM_PATH}/{order_id}{suffix}")
}

fn json_body<T: Serialize>(body: &T) -> Result<serde_json::Value, GatewayError> {
    serde_json::to_value(body).map_err(|e| GatewayError::Transport(TransportError::Parse(e)))
}

fn require_order(order_id: &OrderId) -> Result<(), GatewayError> {
    if order_id.is_empty() {
        return Err(GatewayError::NoActiveOrder);
    }
    Ok(())
}

#[async_trait]
impl RemoteCartGateway for OrderFormGateway {
    #[instrument(skip(self), fields(order_id = %order_id))]
    async fn fetch_current(&self, order_id: &OrderId) -> Result<Cart, GatewayError> {
        require_order(order_id)?;
        self.call(order_id, ApiRequest::get(order_path(order_id, "")))
            .await
    }

    #[instrument(skip(self, items), fields(order_id = %order_id, lines = items.len()))]
    async fn replace_items(
        &self,
        order_id: &OrderId,
        items: &[ItemInput],
    ) -> Result<Cart, GatewayError> {
        require_order(order_id)?;
        let body = json_body(&ReplaceItemsBody {
            order_items: items.iter().map(replace_item).collect(),
        })?;
        self.call(order_id, ApiRequest::post(order_path(order_id, "/items"), body))
            .await
    }

    #[instrument(skip(self, lines), fields(order_id = %order_id, lines = lines.len()))]
    async fn update_lines(
        &self,
        order_id: &OrderId,
        lines: &[LineUpdate],
    ) -> Result<Cart, GatewayError> {
        require_order(order_id)?;
        let body = json_body(&UpdateItemsBody {
            order_items: lines.iter().map(update_item).collect(),
        })?;
        self.call(
            order_id,
            ApiRequest::post(order_path(order_id, "/items/update"), body),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_paths() {
        let id = OrderId::new("abc");
        assert_eq!(order_path(&id, ""), "/api/checkout/pub/orderForm/abc");
        assert_eq!(
            order_path(&id, "/items/update"),
            "/api/checkout/pub/orderForm/abc/items/update"
        );
    }

    #[test]
    fn test_require_order() {
        assert!(matches!(
            require_order(&OrderId::new("")),
            Err(GatewayError::NoActiveOrder)
        ));
        assert!(require_order(&OrderId::new("abc")).is_ok());
    }
}
