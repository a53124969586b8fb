use std::sync::Arc;

use taskmill::config::ServerConfig;
use taskmill::server::{AppState, router};
use taskmill::store::{LibSqlStore, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = ServerConfig::from_env()?;

    eprintln!("Taskmill v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Listening: http://{}", config.bind);
    eprintln!("   Database:  {}", config.db_path);
    eprintln!("   Queue size: {} tasks/worker", config.queue_size);

    let store: Arc<dyn Store> = Arc::new(
        LibSqlStore::open(std::path::Path::new(&config.db_path)).await?,
    );

    let state = AppState {
        store,
        http: reqwest::Client::new(),
        config: config.clone(),
    };

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    tracing::info!(bind = %config.bind, "Server started");
    axum::serve(listener, router(state)).await?;

    Ok(())
}
