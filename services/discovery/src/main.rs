//! Coral Discovery - Mesh Discovery Service
//!
//! Registry and bootstrap token issuer for Coral meshes.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discovery_service::Config;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.env_filter())),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    tracing::info!("Starting Coral Discovery Service");

    discovery_service::run(config).await?;

    Ok(())
}
