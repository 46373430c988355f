//! `webrana-server`: runs the WeBrana Cloud API

use anyhow::Result;
use tracing_subscriber::EnvFilter;
use webrana::config::AppConfig;
use webrana::server::ServerBuilder;
use webrana::storage::Stores;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("webrana=info,tower_http=info")),
        )
        .init();

    let config = AppConfig::load()?;
    let stores = stores(&config).await?;

    ServerBuilder::new(config).with_stores(stores).serve().await
}

#[cfg(feature = "postgres")]
async fn stores(config: &AppConfig) -> Result<Stores> {
    match &config.database.url {
        Some(url) => {
            let pool =
                webrana::storage::postgres::connect(url, config.database.max_connections).await?;
            Ok(Stores::postgres(pool))
        }
        None => {
            tracing::warn!("database.url not set, using in-memory storage");
            Ok(Stores::in_memory())
        }
    }
}

#[cfg(not(feature = "postgres"))]
async fn stores(_config: &AppConfig) -> Result<Stores> {
    tracing::info!("using in-memory storage");
    Ok(Stores::in_memory())
}
