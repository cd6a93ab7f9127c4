use std::sync::Arc;

use prk_todo::adapters::HttpServer;
use prk_todo::config::ServerConfig;
use prk_todo::storage::MemoryStorage;

#[cfg(feature = "storage")]
use anyhow::Context;
#[cfg(all(feature = "tracing", not(feature = "storage")))]
use tracing::warn;
#[cfg(feature = "storage")]
use prk_todo::storage::sqlite::SQLiteStorage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env()?;

    #[cfg(feature = "tracing")]
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()))
        .init();

    #[cfg(feature = "storage")]
    if let Some(url) = &config.database_url {
        let storage = SQLiteStorage::new(url, config.max_connections)
            .await
            .with_context(|| format!("failed to open todo database {}", url))?;
        return HttpServer::new(Arc::new(storage), &config).await?.run().await;
    }

    #[cfg(not(feature = "storage"))]
    if config.database_url.is_some() {
        #[cfg(feature = "tracing")]
        warn!("DATABASE_URL is set but the `storage` feature is off; keeping todos in memory");
        #[cfg(not(feature = "tracing"))]
        eprintln!("DATABASE_URL is set but the `storage` feature is off; keeping todos in memory");
    }

    let storage = Arc::new(MemoryStorage::new());
    HttpServer::new(storage, &config).await?.run().await
}
