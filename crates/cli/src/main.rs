//! cartsync CLI - drive the cart sync engine against a configured backend.
//!
//! # Usage
//!
//! ```bash
//! # Show the cart of an order form
//! cartsync --order 0a1b2c show
//!
//! # Add two units of a SKU
//! cartsync --order 0a1b2c add 42 2
//!
//! # Set a quantity through the line-level update
//! cartsync --order 0a1b2c set 42 3 --line
//!
//! # Empty the cart
//! cartsync --order 0a1b2c clear
//! ```
//!
//! Every command loads the order, applies the change, waits for the backend
//! to confirm it and prints the resulting cart snapshot as JSON.

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::process::ExitCode;

use cartsync_storefront::StorefrontConfig;
use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;

#[derive(Parser)]
#[command(name = "cartsync")]
#[command(author, version, about = "Optimistic cart sync client")]
struct Cli {
    /// Order form identifier
    #[arg(short, long)]
    order: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the current cart
    Show,
    /// Add units of a product
    Add {
        /// Product (SKU) identifier
        product: String,
        /// Units to add
        #[arg(default_value_t = 1, allow_negative_numbers = true)]
        quantity: i64,
    },
    /// Set the quantity of a product (zero or less removes it)
    Set {
        /// Product (SKU) identifier
        product: String,
        /// New quantity
        #[arg(allow_negative_numbers = true)]
        quantity: i64,
        /// Update the line directly instead of replacing the item list
        #[arg(long)]
        line: bool,
    },
    /// Remove a product
    Remove {
        /// Product (SKU) identifier
        product: String,
    },
    /// Remove every product
    Clear,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &StorefrontConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    tracing::info!("Sentry initialized");
    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

fn init_tracing() {
    // Logs go to stderr so stdout stays valid JSON
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cartsync_storefront=info,cartsync_cli=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing();

    let config = match StorefrontConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let _sentry_guard = init_sentry(&config);

    match commands::cart::run(&config, &cli.order, cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("Command failed: {e}");
            ExitCode::FAILURE
        }
    }
}
