//! Core types for cartsync.
//!
//! This module provides type-safe wrappers for the cart domain.

pub mod cart;
pub mod id;
pub mod price;
pub mod status;

pub use cart::{Cart, CartItem, ItemSnapshot, LineRef, ProductRef, PLACEHOLDER_NAME, SYNTHETIC_INDEX};
pub use id::*;
pub use price::{CurrencyCode, Price, UnknownCurrency};
pub use status::{CartSnapshot, SyncError, SyncErrorKind, SyncState};
