mod auth;
mod conversation;
mod db;
mod error;
mod group;
mod message;
mod middleware;
mod notification;
mod response;
mod routes;
mod state;
mod store;
#[cfg(test)]
mod test_support;
mod user;
mod websocket;

use std::sync::Arc;

use anyhow::Context;
use db::{create_pool, run_migrations};
use routes::create_router;
use state::{AppState, Config, StorageBackend};
use store::MemoryStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env().context("Invalid configuration")?);

    let state = match (config.storage_backend, config.database_url.as_deref()) {
        (StorageBackend::Postgres, Some(database_url)) => {
            // Sanitize URL for logging (hide password)
            let url_for_logging = database_url
                .split('@')
                .last()
                .map(|host| format!("<hidden>@{}", host))
                .unwrap_or_else(|| "<invalid format>".to_string());

            tracing::info!("Connecting to database at {}...", url_for_logging);
            let db = create_pool(database_url, config.database_max_connections)
                .await
                .with_context(|| format!("Failed to connect to database at {}", url_for_logging))?;

            tracing::info!("Running migrations...");
            run_migrations(&db).await.context("Failed to run migrations")?;

            AppState::new(
                config.clone(),
                Arc::new(conversation::PgConversationRepository::new(db.clone())),
                Arc::new(message::PgMessageRepository::new(db.clone())),
                Arc::new(user::PgUserDirectory::new(db)),
            )
        }
        (StorageBackend::Postgres, None) => anyhow::bail!("DATABASE_URL must be set for the postgres backend"),
        (StorageBackend::Memory, _) => {
            tracing::warn!("Using the in-memory store; data is lost on restart");
            let store = MemoryStore::new();
            AppState::new(
                config.clone(),
                Arc::new(store.clone()),
                Arc::new(store),
                Arc::new(user::MemoryUserDirectory::new()),
            )
        }
    };

    // Create router
    let app = create_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    axum::serve(listener, app).await?;

    Ok(())
}
