//! Order-form wire types (JSON, camelCase).
//!
//! Only the fields the cart needs are modelled; everything else in the
//! order form is ignored on deserialization.

use serde::{Deserialize, Serialize};

/// Cookie that binds checkout requests to an order form.
pub const ORDER_FORM_COOKIE: &str = "checkout.vtex.com";

// =============================================================================
// Responses
// =============================================================================

/// An order form as returned by every checkout endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderForm {
    pub order_form_id: String,
    /// Total in cents.
    #[serde(default)]
    pub value: i64,
    #[serde(default)]
    pub items: Vec<OrderFormItem>,
    #[serde(default)]
    pub store_preferences_data: Option<StorePreferences>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderFormItem {
    pub unique_id: String,
    /// SKU id.
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub image_url: Option<String>,
    pub quantity: u32,
    /// Unit selling price in cents.
    #[serde(default)]
    pub selling_price: i64,
    #[serde(default)]
    pub seller: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorePreferences {
    pub currency_code: String,
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceItemsBody<'a> {
    pub order_items: Vec<ReplaceItem<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceItem<'a> {
    pub id: &'a str,
    pub quantity: u32,
    pub seller: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<&'a str>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItemsBody<'a> {
    pub order_items: Vec<UpdateItem<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateItem<'a> {
    pub index: u32,
    pub quantity: u32,
    pub unique_id: &'a str,
    pub seller: &'a str,
}
