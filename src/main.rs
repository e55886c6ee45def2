use std::net::SocketAddr;
use std::sync::Arc;

use fowergram_auth::{
    auth::{
        AccountRepository, EmailSender, LogEmailSender, MemoryStore, PgAccountRepository,
        PgTokenRepository, TokenRepository,
    },
    build_auth_service,
    config::{AppConfig, StorageBackend},
    create_router, db,
    rate_limit::{CounterStore, MemoryCounterStore, RateLimiter, RedisCounterStore},
    AppState,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // Initialize tracing subscriber, RUST_LOG overrides the default level
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .with_level(true)
        .init();

    tracing::info!("Fowergram Auth - Starting...");

    let config = AppConfig::from_env().expect("Invalid configuration");

    let (accounts, tokens, counters): (
        Arc<dyn AccountRepository>,
        Arc<dyn TokenRepository>,
        Arc<dyn CounterStore>,
    ) = match config.storage {
        StorageBackend::Postgres => {
            let database_url = config.database_url.as_deref().expect("DATABASE_URL must be set");
            let redis_url = config.redis_url.as_deref().expect("REDIS_URL must be set");

            tracing::info!("Connecting to database...");
            let pool = db::create_pool(database_url, config.store_timeout)
                .await
                .expect("Failed to create database pool");

            // Run SQLx migrations on startup
            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .expect("Failed to run database migrations");
            tracing::info!("Migrations completed successfully");

            let counters = RedisCounterStore::connect(redis_url, config.store_timeout)
                .await
                .expect("Failed to connect to Redis");

            let accounts: Arc<dyn AccountRepository> =
                Arc::new(PgAccountRepository::new(pool.clone(), config.store_timeout));
            let tokens: Arc<dyn TokenRepository> =
                Arc::new(PgTokenRepository::new(pool, config.store_timeout));
            let counters: Arc<dyn CounterStore> = Arc::new(counters);
            (accounts, tokens, counters)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            let accounts: Arc<dyn AccountRepository> = store.clone();
            let tokens: Arc<dyn TokenRepository> = store;
            let counters: Arc<dyn CounterStore> = Arc::new(MemoryCounterStore::new());
            (accounts, tokens, counters)
        }
    };

    let email_sender: Arc<dyn EmailSender> =
        Arc::new(LogEmailSender::new(config.app_base_url.as_str()));
    let auth = Arc::new(build_auth_service(&config, accounts, tokens, email_sender));

    match auth.purge_expired().await {
        Ok(removed) => tracing::info!("Removed {} expired tokens", removed),
        Err(e) => tracing::warn!("Expired token cleanup failed: {}", e),
    }

    let state = AppState::new(auth, RateLimiter::new(counters, config.rate_limit.clone()));
    let app = create_router(state, &config.allowed_origins);

    // Start the Axum server
    let addr = config.bind_address();
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Swagger UI available at http://{}/swagger-ui", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .expect("Server error");
}
