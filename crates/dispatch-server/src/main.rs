//! # Dispatch Server
//!
//! Realtime booking dispatch server: riders submit bookings, operators
//! assign drivers to pools, and everyone affected hears about it over a
//! WebSocket event channel.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! dispatchd
//!
//! # Run with environment variables
//! DISPATCH_PORT=8080 DISPATCH_HOST=0.0.0.0 dispatchd
//! ```
//!
//! Configuration is read from `dispatch.toml` if present; see
//! [`config::Config`].

mod api;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dispatch=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Dispatch server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
