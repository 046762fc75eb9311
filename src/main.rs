use anyhow::Result;
use locale_graphql_gateway::{bootstrap, config};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("locale_graphql_gateway=info".parse()?),
        )
        .init();

    info!("Starting locale GraphQL gateway");

    // Load configuration from environment
    let config = config::Config::from_env()?;

    let gateway = match bootstrap::start(&config).await {
        Ok(gateway) => gateway,
        Err(e) => {
            error!("Startup failed: {:#}", e);
            std::process::exit(1);
        }
    };

    gateway.serve().await
}
