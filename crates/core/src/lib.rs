//! cartsync core - shared cart types.
//!
//! This crate provides the types shared by every cartsync component:
//! - `storefront` - session, authenticated transport, backend gateway and
//!   the cart sync engine
//! - `cli` - command-line driver for the engine
//!
//! # Architecture
//!
//! The core crate contains only types and pure cart mutations - no I/O, no
//! HTTP clients, no timers. This keeps it lightweight and allows it to be
//! used anywhere.
//!
//! # Modules
//!
//! - [`types`] - IDs, prices, the cart entity and sync status values

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod types;

pub use types::*;
