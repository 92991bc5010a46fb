//! cartsync storefront client library.
//!
//! Keeps a local, instantly responsive cart in sync with an authoritative
//! order backend:
//!
//! - [`transport`]: HTTP with credential injection and one-shot session
//!   revalidation on 401
//! - [`gateway`]: the backend contract and the order-form REST implementation
//! - [`engine`]: optimistic mutations, debounced reconciliation and rollback
//! - [`session`]: the credential holder the transport authenticates with

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod session;
pub mod transport;

pub use config::{BackendConfig, ConfigError, StorefrontConfig, SyncConfig};
pub use engine::{CartSyncEngine, QuantityUpdate};
pub use error::CartError;
pub use gateway::{GatewayError, OrderFormGateway, RemoteCartGateway};
pub use session::{Session, SessionEvent, SessionToken, TokenSession};
pub use transport::{ApiRequest, AuthenticatedTransport, CredentialScheme, TransportError};
