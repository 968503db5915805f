use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Every route here sits behind the bearer-token filter layered on in
/// `create_router`, so handlers can rely on a resolved `AuthUser` being
/// available. Ownership/role decisions for mutating post routes happen
/// inside the handlers via `authorize_post_access`: delete requires owner or
/// moderator, update requires owner or admin.
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // --- Posts ---
        .route("/posts", post(handlers::create_post))
        .route(
            "/posts/{id}",
            get(handlers::get_post)
                .patch(handlers::update_post)
                .delete(handlers::delete_post),
        )
        // POST /posts/{id}/comments
        .route("/posts/{id}/comments", post(handlers::create_comment))
        // --- Users & follow graph ---
        .route("/users/{id}", get(handlers::get_user))
        // Follow is not idempotent (duplicate edge is 409); unfollow is.
        .route("/users/{id}/follow", put(handlers::follow_user))
        .route("/users/{id}/unfollow", put(handlers::unfollow_user))
        // GET /users/feed — posts from followed users plus the requester's own.
        .route("/users/feed", get(handlers::get_user_feed))
}
