use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Public Router Module
///
/// No authentication filter applies here, but admission control does: these
/// routes sit behind the rate-limit layer like everything else, so login and
/// registration cannot be hammered anonymously.
pub fn public_routes() -> Router<AppState> {
    Router::<AppState>::new()
        .route("/health", get(handlers::health_check))
        // POST /authentication/user
        // Registers an inactive account and returns the one-time plaintext
        // invitation token alongside the created user.
        .route("/authentication/user", post(handlers::register_user))
        // POST /authentication/token
        // Verifies credentials and issues a signed bearer token.
        .route("/authentication/token", post(handlers::create_token))
        // PUT /users/activate/{token}
        // Consumes the invitation token; activation is the only way an
        // account becomes visible to authentication and profile lookups.
        .route("/users/activate/{token}", put(handlers::activate_user))
}
