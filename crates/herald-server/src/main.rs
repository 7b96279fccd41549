//! # Herald Server
//!
//! In-memory pub/sub broker with per-topic replay history.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! herald
//!
//! # Run with a specific config file
//! HERALD_CONFIG=/path/to/herald.toml herald
//!
//! # Run with environment variables
//! HERALD_PORT=8080 HERALD_HOST=0.0.0.0 herald
//! HERALD__LIMITS__MAILBOX_CAPACITY=4096 herald
//! ```

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
                .unwrap_or_else(|_| "herald=debug,herald_core=debug,herald_transport=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Herald server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
