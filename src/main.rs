use std::time::Duration;

use anyhow::Result;
use codecollab::services::ChatRetention;
use codecollab::{create_app, AppConfig, AppState, Database};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "codecollab=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::new()?;
    let bind_address = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting CodeCollab server on {}", bind_address);

    let database = match Database::new(&config.database.url, config.database.max_connections).await {
        Ok(db) => {
            info!("Database connected successfully");
            db
        }
        Err(e) => {
            error!("Failed to connect to database: {}", e);
            return Err(e);
        }
    };

    let app_state = match AppState::new(database.clone(), config.clone()) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize application state: {}", e);
            return Err(e);
        }
    };

    let shutdown = CancellationToken::new();
    let retention = ChatRetention::new(
        database.pool().clone(),
        config.chat.retention_days,
        Duration::from_secs(config.chat.sweep_interval_secs),
    )
    .spawn(shutdown.clone());

    let app = create_app(app_state).await?;
    let listener = tokio::net::TcpListener::bind(&bind_address).await?;

    info!("Server listening on http://{}", bind_address);

    let signal_token = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            signal_token.cancel();
        })
        .await?;

    shutdown.cancel();
    if let Err(e) = retention.await {
        error!("Chat retention task panicked: {}", e);
    }

    Ok(())
}
