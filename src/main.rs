use qna_portal::{
    AppState, CacheState, MemoryCache, PostgresStore, RedisCache, StoreState, TokenCodec,
    config::{AppConfig, Env},
    create_router,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Entry point: configuration, logging, store, cache, then the HTTP server.
#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    // Fail-fast: a missing production secret stops the process here.
    let config = AppConfig::load();

    // RUST_LOG wins; otherwise sensible local defaults.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "qna_portal=debug,tower_http=info,axum=trace".into());

    // Pretty output locally, JSON in production for log aggregators.
    match config.env {
        Env::Local => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.db_url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DATABASE_URL.");

    let store = Arc::new(PostgresStore::new(pool)) as StoreState;

    // Redis when configured, otherwise the in-process tier. Either way the
    // cache is an accelerator only; losing it never loses data.
    let cache: CacheState = match config.redis_url.as_deref() {
        Some(url) => {
            let redis = RedisCache::connect(url)
                .expect("FATAL: Invalid REDIS_URL, could not create connection pool.");
            tracing::info!("Cache tier: Redis");
            Arc::new(redis)
        }
        None => {
            tracing::info!("Cache tier: in-process memory");
            Arc::new(MemoryCache::new())
        }
    };

    let codec = TokenCodec::new(&config.jwt_secret, config.token_lifetime);
    let app_state = AppState::new(store, cache, codec, config);

    let app = create_router(app_state);

    let listener = TcpListener::bind("0.0.0.0:3000")
        .await
        .expect("FATAL: Could not bind 0.0.0.0:3000");

    tracing::info!("Listening on 0.0.0.0:3000");
    tracing::info!("API Documentation (Swagger UI) available at: http://localhost:3000/swagger-ui");

    axum::serve(listener, app)
        .await
        .expect("FATAL: Server terminated unexpectedly");
}
