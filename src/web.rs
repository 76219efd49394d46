#![cfg(not(tarpaulin_include))]

use clap::Parser;
use datavis::app;
use datavis::config::ServerConfig;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the web application
///
/// Installs the tracing subscriber (`RUST_LOG` overrides the default
/// filter), reads the configuration from flags and `DATAVIS_*` variables and
/// runs the server.
///
/// # Returns
/// * `Result<(), Box<dyn std::error::Error>>` - Success or error object
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "datavis=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ServerConfig::parse();
    app::run(config).await
}
