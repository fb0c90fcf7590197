use chat_relay::{
    auth::{IdentityVerifier, JwtVerifier},
    db::{create_pool, run_migrations},
    message::{InMemoryMessageStore, MessageRepository, MessageStore},
    presence::{InMemoryPresence, PresenceDirectory, RedisPresence},
    routes::create_router,
    state::{AppState, Config},
};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chat_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Arc::new(Config::from_env()?);

    // Message store
    let store: Arc<dyn MessageStore> = match &config.database_url {
        Some(database_url) => {
            // Sanitize URL for logging (hide password)
            let url_for_logging = database_url
                .split('@')
                .last()
                .map(|host| format!("<hidden>@{}", host))
                .unwrap_or_else(|| "<invalid format>".to_string());

            tracing::info!("Connecting to database at {}...", url_for_logging);
            let db = create_pool(database_url).await.map_err(|e| {
                tracing::error!(error = %e, "Failed to connect to database");
                e
            })?;

            tracing::info!("Running migrations...");
            run_migrations(&db).await?;

            Arc::new(MessageRepository::new(db))
        }
        None => {
            tracing::warn!("DATABASE_URL is not set; messages are kept in memory and lost on restart");
            Arc::new(InMemoryMessageStore::new())
        }
    };

    // Presence directory
    let presence_ttl = Duration::from_secs(config.presence_ttl_secs);
    let presence: Arc<dyn PresenceDirectory> = match &config.redis_url {
        Some(redis_url) => {
            tracing::info!("Connecting to Redis for presence...");
            Arc::new(RedisPresence::connect(redis_url, presence_ttl).await?)
        }
        None => {
            tracing::warn!("REDIS_URL is not set; presence is tracked in-process");
            let presence = InMemoryPresence::new(presence_ttl);
            presence.spawn_sweeper(Duration::from_secs(60));
            Arc::new(presence)
        }
    };

    let verifier: Arc<dyn IdentityVerifier> = Arc::new(JwtVerifier::new(
        config.jwt_secret.clone(),
        config.jwt_issuer.as_deref(),
        config.jwt_audience.as_deref(),
    ));

    let state = AppState::new(config.clone(), store, presence, verifier);

    // Create router
    let app = create_router(state);

    // Start server
    let addr = config.bind_addr();
    tracing::info!("Server starting on http://{}", addr);
    tracing::info!("OpenAPI document at http://{}/api-docs/openapi.json", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
