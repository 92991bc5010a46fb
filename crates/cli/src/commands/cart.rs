//! Cart commands.
//!
//! # Environment Variables
//!
//! See `cartsync_storefront::config`; `CARTSYNC_BASE_URL` is required and
//! `CARTSYNC_AUTH_TOKEN` signs the customer in.

use std::sync::Arc;

use cartsync_core::{CartSnapshot, OrderId};
use cartsync_storefront::{
    AuthenticatedTransport, CartError, CartSyncEngine, OrderFormGateway, QuantityUpdate,
    SessionToken, StorefrontConfig, TokenSession, TransportError,
};
use thiserror::Error;

use crate::Commands;

/// Errors that can occur while running a cart command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The HTTP transport could not be built.
    #[error("Transport setup failed: {0}")]
    Transport(#[from] TransportError),

    /// The cart operation failed.
    #[error(transparent)]
    Cart(#[from] CartError),

    /// The snapshot could not be serialized.
    #[error("Failed to render cart: {0}")]
    Render(#[from] serde_json::Error),
}

/// Load the order, apply `command` and print the confirmed snapshot.
///
/// # Errors
///
/// Returns an error if the backend is unreachable, rejects the change, or
/// the session cannot be authenticated.
pub(crate) async fn run(
    config: &StorefrontConfig,
    order: &str,
    command: Commands,
) -> Result<(), CommandError> {
    let engine = build_engine(config)?;
    engine.load(OrderId::new(order)).await?;

    match command {
        Commands::Show => {}
        Commands::Add { product, quantity } => engine.add_item(product, quantity)?,
        Commands::Set {
            product,
            quantity,
            line: true,
        } => {
            if let QuantityUpdate::Confirmed { quantity: accepted } =
                engine.update_line_quantity(product, quantity).await?
                && i64::from(accepted) != quantity.max(0)
            {
                tracing::warn!(requested = quantity, accepted, "Quantity limited by stock");
            }
        }
        Commands::Set {
            product, quantity, ..
        } => engine.set_item_quantity(product, quantity)?,
        Commands::Remove { product } => engine.remove_item(product)?,
        Commands::Clear => engine.clear().await?,
    }

    engine.flush().await?;
    print_snapshot(&engine.snapshot())
}

fn build_engine(config: &StorefrontConfig) -> Result<CartSyncEngine, CommandError> {
    let token = config.backend.auth_token.clone().map(|value| SessionToken {
        value,
        expires_at: None,
    });
    let session = TokenSession::new(token, None);

    let transport = AuthenticatedTransport::new(&config.backend, Some(Arc::new(session.clone())))?;
    let engine = CartSyncEngine::new(
        Arc::new(OrderFormGateway::new(transport)),
        config.sync.clone(),
    );
    // The listener ends when the session is dropped.
    drop(engine.watch_session(session.subscribe()));
    Ok(engine)
}

#[allow(clippy::print_stdout)]
fn print_snapshot(snapshot: &CartSnapshot) -> Result<(), CommandError> {
    println!("{}", serde_json::to_string_pretty(snapshot)?);
    Ok(())
}
