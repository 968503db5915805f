use axum::{
    Router,
    extract::{FromRef, Request},
    http::HeaderName,
    middleware::{self, Next},
    response::Response,
};

use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod cache;
pub mod config;
pub mod error;
pub mod handlers;
pub mod limiter;
pub mod models;
pub mod repository;

pub mod routes;
use auth::AuthUser;
use routes::{authenticated, public};

// --- Public Re-exports ---

pub use auth::TokenAuthenticator;
pub use cache::{NoopUserCache, RedisUserCache, UserCacheState};
pub use config::AppConfig;
pub use error::ApiError;
pub use limiter::{FixedWindowLimiter, NoopLimiter, RateLimiterState};
pub use repository::{PostgresRepository, RepositoryState};

/// AppState
///
/// The single, immutable container of shared services, cloned into every
/// request. Identity and other request-scoped data never live here; they
/// travel through extractors on the request itself.
#[derive(Clone)]
pub struct AppState {
    /// Primary store access behind the Repository trait.
    pub repo: RepositoryState,
    /// Cache-aside store for principal snapshots; a no-op strategy when
    /// caching is disabled.
    pub cache: UserCacheState,
    /// Token issue/validate service.
    pub authenticator: TokenAuthenticator,
    /// Admission control strategy; a no-op pass-through when disabled.
    pub limiter: RateLimiterState,
    /// The loaded, immutable configuration.
    pub config: AppConfig,
}

// --- Axum FromRef Extractor Implementations ---

// These let extractors (notably AuthUser) pull exactly the services they
// need out of the shared state.

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for UserCacheState {
    fn from_ref(app_state: &AppState) -> UserCacheState {
        app_state.cache.clone()
    }
}

impl FromRef<AppState> for TokenAuthenticator {
    fn from_ref(app_state: &AppState) -> TokenAuthenticator {
        app_state.authenticator.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// auth_middleware
///
/// Enforces authentication for the authenticated route group by running the
/// `AuthUser` extractor. On failure the extractor rejects with 401 and the
/// handler never executes; on success the resolved principal is stored in
/// the request extensions, so handler-level `AuthUser` arguments reuse it
/// without a second token validation or store lookup.
async fn auth_middleware(auth_user: AuthUser, mut request: Request, next: Next) -> Response {
    request.extensions_mut().insert(auth_user);
    next.run(request).await
}

/// create_router
///
/// Assembles the request pipeline once, as an explicit ordered stack of
/// filters around the route table:
///
///   request id -> trace -> timeout -> cors -> rate limit -> [auth] -> handler
///
/// Admission control runs before authentication so rejected bursts never
/// cost a token validation or a database round trip. Optionality of the
/// limiter and the cache is resolved at startup by strategy selection, not
/// by conditionals here.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(Any)
        .allow_origin(Any)
        .allow_headers(Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    let base_router = Router::new()
        // Public routes: rate limited, no auth filter.
        .merge(public::public_routes())
        // Authenticated routes: the bearer-token gate applies per route.
        .merge(
            authenticated::authenticated_routes()
                .route_layer(middleware::from_fn_with_state(state.clone(), auth_middleware)),
        )
        // Admission control wraps both groups and therefore runs first.
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limiter::rate_limit_middleware,
        ))
        .with_state(state.clone());

    base_router
        .layer(
            ServiceBuilder::new()
                // Correlation id for every request, generated when missing.
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                // One tracing span per request; error/warn events emitted by
                // the error mapper inherit method/uri/req_id from it.
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id))
                // End-to-end deadline. Every mutation below this layer is a
                // single atomic statement, so a request aborted here never
                // leaves a partial write visible.
                .layer(TimeoutLayer::new(state.config.request_timeout)),
        )
        .layer(cors)
}

/// Customizes the per-request tracing span to correlate every log line of a
/// request by method, uri and request id.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
