//! Order-form to domain conversions.

use cartsync_core::{
    Cart, CartItem, CurrencyCode, LineRef, OrderId, Price, ProductId, ProductRef, SellerId,
};
use tracing::warn;

use super::types::{OrderForm, OrderFormItem, ReplaceItem, UpdateItem};
use crate::gateway::{ItemInput, LineUpdate};

/// Build the domain cart from an order form.
///
/// Lines keep the server's order; a line's index is its array position.
/// Zero-quantity lines are dropped since the cart never stores them.
pub fn convert_order_form(form: OrderForm) -> Cart {
    let currency = convert_currency(form.store_preferences_data.as_ref().map(|p| p.currency_code.as_str()));

    let items = form
        .items
        .into_iter()
        .enumerate()
        .filter(|(_, item)| item.quantity > 0)
        .map(|(index, item)| {
            let index = u32::try_from(index).unwrap_or(u32::MAX);
            convert_item(item, index, currency)
        })
        .collect();

    Cart {
        order_id: Some(OrderId::new(form.order_form_id)),
        items,
        subtotal: Price::from_cents(form.value, currency),
    }
}

fn convert_item(item: OrderFormItem, index: u32, currency: CurrencyCode) -> CartItem {
    CartItem {
        line: LineRef::confirmed(item.unique_id, index),
        quantity: item.quantity,
        product: ProductRef {
            id: ProductId::new(item.id),
            name: item.name,
            image: item.image_url.filter(|url| !url.is_empty()),
        },
        unit_price: Price::from_cents(item.selling_price, currency),
        seller: item.seller.map(SellerId::new).unwrap_or_default(),
    }
}

fn convert_currency(code: Option<&str>) -> CurrencyCode {
    let Some(code) = code else {
        return CurrencyCode::default();
    };
    code.parse().unwrap_or_else(|e| {
        warn!(error = %e, "Unsupported order form currency, using default");
        CurrencyCode::default()
    })
}

pub fn replace_item(input: &ItemInput) -> ReplaceItem<'_> {
    ReplaceItem {
        id: input.product_id.as_str(),
        quantity: input.quantity,
        seller: input.seller.as_str(),
        unique_id: input.line_id.as_ref().map(|id| id.as_str()),
    }
}

pub fn update_item(update: &LineUpdate) -> UpdateItem<'_> {
    UpdateItem {
        index: update.index,
        quantity: update.quantity,
        unique_id: update.line_id.as_str(),
        seller: update.seller.as_str(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use rust_decimal::Decimal;

    use super::*;

    const ORDER_FORM: &str = r#"{
        "orderFormId": "of-123",
        "value": 4590,
        "items": [
            {"uniqueId": "u1", "id": "sku-1", "name": "Coffee", "imageUrl": "https://img/1.png",
             "quantity": 2, "sellingPrice": 1295, "seller": "1"},
            {"uniqueId": "u2", "id": "sku-2", "name": "Mug", "imageUrl": "",
             "quantity": 0, "sellingPrice": 500, "seller": "1"},
            {"uniqueId": "u3", "id": "sku-3", "name": "Filter", "quantity": 1,
             "sellingPrice": 2000}
        ],
        "storePreferencesData": {"currencyCode": "COP"},
        "shippingData": {"ignored": true}
    }"#;

    #[test]
    fn test_convert_order_form() {
        let form: OrderForm = serde_json::from_str(ORDER_FORM).unwrap();
        let cart = convert_order_form(form);

        assert_eq!(cart.order_id, Some(OrderId::new("of-123")));
        assert_eq!(cart.currency(), CurrencyCode::COP);
        assert_eq!(cart.subtotal.amount, Decimal::new(4590, 2));

        // The zero-quantity line is dropped but indices stay positional.
        assert_eq!(cart.items.len(), 2);
        let coffee = &cart.items[0];
        assert_eq!(coffee.line, LineRef::confirmed("u1", 0));
        assert_eq!(coffee.unit_price.amount, Decimal::new(1295, 2));
        assert_eq!(coffee.product.image.as_deref(), Some("https://img/1.png"));

        let filter = &cart.items[1];
        assert_eq!(filter.line.server_index(), 2);
        assert_eq!(filter.seller, SellerId::default());
        assert!(filter.product.image.is_none());
        assert!(cart.is_reconciled());
    }

    #[test]
    fn test_unknown_currency_falls_back() {
        assert_eq!(convert_currency(Some("XYZ")), CurrencyCode::default());
        assert_eq!(convert_currency(None), CurrencyCode::default());
        assert_eq!(convert_currency(Some("EUR")), CurrencyCode::EUR);
    }

    #[test]
    fn test_replace_item_omits_unique_id_for_new_lines() {
        let input = ItemInput {
            product_id: ProductId::new("sku-9"),
            quantity: 3,
            seller: SellerId::default(),
            line_id: None,
        };
        let json = serde_json::to_value(replace_item(&input)).unwrap();
        assert_eq!(json, serde_json::json!({"id": "sku-9", "quantity": 3, "seller": "1"}));
    }

    #[test]
    fn test_update_item_shape() {
        let update = LineUpdate {
            index: 4,
            line_id: cartsync_core::LineId::new("u4"),
            quantity: 0,
            seller: SellerId::new("2"),
        };
        let json = serde_json::to_value(update_item(&update)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"index": 4, "quantity": 0, "uniqueId": "u4", "seller": "2"})
        );
    }
}
