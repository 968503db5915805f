use rsocial::{
    AppState, NoopLimiter, NoopUserCache, RedisUserCache, TokenAuthenticator, create_router,
    config::{AppConfig, Env},
    limiter::FixedWindowLimiter,
    repository::{PostgresRepository, RepositoryState},
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// main
///
/// The asynchronous entry point for the application, responsible for
/// initializing all core components: Configuration, Logging, Database,
/// Cache, Admission Control, and the HTTP Server.
#[tokio::main]
async fn main() {
    // 1. Configuration & Environment Loading (Fail-Fast)
    // Loads .env file settings before configuration can be read.
    dotenv::dotenv().ok();
    // AppConfig::load() implements the fail-fast principle for missing Production secrets.
    let config = AppConfig::load();

    // 2. Logging Filter Setup
    // Sets the default log level. It prioritizes the RUST_LOG environment variable,
    // falling back to sensible defaults for local development.
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "rsocial=debug,tower_http=info,axum=trace".into());

    // 3. Initialize Logging based on Environment
    // The structured logging format is dynamically selected based on ENV.
    match config.env {
        Env::Local => {
            // LOCAL: Pretty print output for human readability during local debugging.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        Env::Production => {
            // PROD: JSON format output for ingestion by centralized log aggregators.
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
    }

    tracing::info!("Application starting in {:?} mode", config.env);

    // 4. Database Initialization (Postgres)
    // Creates a connection pool to the Postgres instance defined in the configuration.
    let pool = PgPoolOptions::new()
        .max_connections(config.db.max_open_conns)
        .min_connections(config.db.max_idle_conns.min(config.db.max_open_conns))
        .idle_timeout(config.db.max_idle_time)
        .acquire_timeout(config.db.acquire_timeout)
        .connect(&config.db.url)
        .await
        .expect("FATAL: Failed to connect to Postgres. Check DB_ADDR.");

    // Instantiate the Repository, wrapping it in an Arc for thread-safe sharing.
    let repo = Arc::new(PostgresRepository::new(pool)) as RepositoryState;

    // 5. Cache Initialization (Redis, optional)
    // When disabled, the no-op strategy is selected once here and no handler
    // ever branches on the setting again.
    let cache = if config.redis.enabled {
        let redis_cache = RedisUserCache::connect(&config.redis.url(), config.redis.user_ttl)
            .await
            .expect("FATAL: Failed to connect to Redis. Check REDIS_ADDR.");
        tracing::info!("User cache enabled (redis at {})", config.redis.addr);
        Arc::new(redis_cache) as rsocial::UserCacheState
    } else {
        Arc::new(NoopUserCache) as rsocial::UserCacheState
    };

    // 6. Admission Control Initialization (optional)
    // The fixed-window limiter accumulates one entry per client key, so a
    // background task sweeps windows that can no longer affect decisions.
    let limiter = if config.rate_limiter.enabled {
        let fixed = Arc::new(FixedWindowLimiter::new(
            config.rate_limiter.requests_per_window,
            config.rate_limiter.window,
        ));
        let sweeper = Arc::clone(&fixed);
        let mut interval = tokio::time::interval(config.rate_limiter.window.max(
            std::time::Duration::from_secs(1),
        ) * 4);
        tokio::spawn(async move {
            loop {
                interval.tick().await;
                sweeper.sweep();
            }
        });
        tracing::info!(
            "Rate limiter enabled ({} requests per {:?})",
            config.rate_limiter.requests_per_window,
            config.rate_limiter.window
        );
        fixed as rsocial::RateLimiterState
    } else {
        Arc::new(NoopLimiter) as rsocial::RateLimiterState
    };

    // 7. Token Authenticator
    // The issuer doubles as the audience for this single-service deployment.
    let authenticator = TokenAuthenticator::new(
        config.auth.secret.clone(),
        config.auth.iss.clone(),
        config.auth.iss.clone(),
        config.auth.exp,
    );

    // 8. Unified State Assembly
    let addr = config.addr.clone();
    let app_state = AppState {
        repo,
        cache,
        authenticator,
        limiter,
        config,
    };

    // 9. Router and Server Startup
    let app = create_router(app_state);

    // Binds the TCP listener and initiates the HTTP server. Peer addresses
    // are captured so the rate limiter can key unproxied clients.
    let listener = TcpListener::bind(&addr).await.unwrap();

    tracing::info!("HTTP server bound successfully.");
    tracing::info!("Listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .unwrap();

    tracing::info!("Server stopped.");
}

/// Resolves on SIGINT or SIGTERM; the server then stops accepting new
/// connections and drains in-flight requests before exiting.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("FATAL: failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("FATAL: failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, draining in-flight requests.");
}
