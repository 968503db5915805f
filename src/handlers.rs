use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    AppState,
    auth::{AuthUser, authorize_post_access},
    error::ApiError,
    models::{
        Comment, CreateCommentRequest, CreatePostRequest, CreateTokenRequest, FeedItem, FeedQuery,
        Post, PostDetail, RegisterUserRequest, TokenResponse, UpdatePostRequest, User,
        UserWithToken,
    },
    repository::{FeedPage, NewPost, NewUser},
};

// Route-level role requirements, resolved to concrete levels through the
// roles table at decision time. Wiring: deleting someone else's post takes a
// moderator, editing it takes an admin; the owner always passes either.
const DELETE_POST_ROLE: &str = "moderator";
const UPDATE_POST_ROLE: &str = "admin";

// --- Health ---

/// [Public Route] Liveness probe; also reports the running environment.
pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let env = match state.config.env {
        crate::config::Env::Local => "local",
        crate::config::Env::Production => "production",
    };
    Json(json!({
        "status": "ok",
        "env": env,
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// --- Authentication ---

/// register_user
///
/// [Public Route] Creates an inactive account plus a single-use invitation.
/// Only the SHA-256 hash of the invitation token is persisted; the plaintext
/// goes back to the caller exactly once, in this response.
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<UserWithToken>), ApiError> {
    require_text("username", &payload.username, 100)?;
    require_text("email", &payload.email, 255)?;
    if !payload.email.contains('@') {
        return Err(ApiError::Validation("email is invalid".to_string()));
    }
    if payload.password.len() < 3 || payload.password.len() > 72 {
        return Err(ApiError::Validation(
            "password must be between 3 and 72 characters".to_string(),
        ));
    }

    let password_hash = hash_password(&payload.password)?;

    let plain_token = Uuid::new_v4().to_string();
    let token_hash = invitation_token_hash(&plain_token);

    let user = state
        .repo
        .create_and_invite(
            NewUser {
                username: payload.username,
                email: payload.email,
                password_hash,
            },
            &token_hash,
            state.config.invitation_exp,
        )
        .await?;

    tracing::info!(user_id = user.id, "user registered, awaiting activation");

    Ok((
        StatusCode::CREATED,
        Json(UserWithToken {
            user,
            token: plain_token,
        }),
    ))
}

/// create_token
///
/// [Public Route] Verifies credentials against the primary store (never the
/// cache) and issues a signed bearer token. Unknown email and bad password
/// are indistinguishable to the caller: both are 401.
pub async fn create_token(
    State(state): State<AppState>,
    Json(payload): Json<CreateTokenRequest>,
) -> Result<(StatusCode, Json<TokenResponse>), ApiError> {
    require_text("email", &payload.email, 255)?;
    require_text("password", &payload.password, 72)?;

    let user = state
        .repo
        .get_user_by_email(&payload.email)
        .await?
        .ok_or(ApiError::Unauthorized)?;

    verify_password(&payload.password, &user.password_hash)?;

    let token = state.authenticator.issue(user.id)?;

    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

/// activate_user
///
/// [Public Route] Consumes an invitation token. The cached snapshot of the
/// user (if any) is invalidated after the write so the next resolution sees
/// the activated account immediately instead of waiting out the TTL.
pub async fn activate_user(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<StatusCode, ApiError> {
    let token_hash = invitation_token_hash(&token);

    let user_id = state.repo.activate_user(&token_hash).await?;
    state.cache.invalidate(user_id).await;

    Ok(StatusCode::NO_CONTENT)
}

// --- Users ---

/// [Authenticated Route] Fetches a user profile by id, through the
/// read-through cache.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<Json<User>, ApiError> {
    let user = crate::cache::resolve_user(&state.repo, &state.cache, user_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(user))
}

/// [Authenticated Route] Follows a user. A second follow of the same target
/// reports 409; interpreting the duplicate is the caller's business.
pub async fn follow_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if auth.id == user_id {
        return Err(ApiError::Validation("cannot follow yourself".to_string()));
    }

    state.repo.follow(auth.id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// [Authenticated Route] Unfollows a user. Idempotent: unfollowing an
/// absent edge succeeds with no effect.
pub async fn unfollow_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.repo.unfollow(auth.id, user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// [Authenticated Route] The follower feed: posts by followed users plus the
/// requester's own, paginated.
pub async fn get_user_feed(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Vec<FeedItem>>, ApiError> {
    let page = validate_feed_query(query)?;
    let feed = state.repo.get_user_feed(auth.id, &page).await?;
    Ok(Json(feed))
}

// --- Posts ---

/// [Authenticated Route] Creates a post owned by the requester, with
/// `version` starting at 0.
pub async fn create_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreatePostRequest>,
) -> Result<(StatusCode, Json<Post>), ApiError> {
    require_text("title", &payload.title, 100)?;
    require_text("content", &payload.content, 1000)?;

    let post = state
        .repo
        .create_post(NewPost {
            user_id: auth.id,
            title: payload.title,
            content: payload.content,
            tags: payload.tags,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(post)))
}

/// [Authenticated Route] Fetches a post with its comments.
pub async fn get_post(
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<Json<PostDetail>, ApiError> {
    let post = state.repo.get_post(post_id).await?.ok_or(ApiError::NotFound)?;
    let comments = state.repo.get_comments(post_id).await?;

    Ok(Json(PostDetail { post, comments }))
}

/// update_post
///
/// [Authenticated Route] Version-guarded partial update. Gate: owner or
/// admin. The caller supplies the version it last observed; a stale version
/// yields 409 and the caller decides whether to re-fetch and retry.
pub async fn update_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Json(payload): Json<UpdatePostRequest>,
) -> Result<Json<Post>, ApiError> {
    let mut post = state.repo.get_post(post_id).await?.ok_or(ApiError::NotFound)?;

    let required = state.repo.get_role_by_name(UPDATE_POST_ROLE).await?;
    authorize_post_access(&auth, post.user_id, &required)?;

    if let Some(title) = payload.title {
        post.title = title;
    }
    if let Some(content) = payload.content {
        post.content = content;
    }
    require_text("title", &post.title, 100)?;
    require_text("content", &post.content, 1000)?;

    post.version = state
        .repo
        .update_post(post_id, &post.title, &post.content, payload.version)
        .await?;

    Ok(Json(post))
}

/// [Authenticated Route] Deletes a post. Gate: owner or moderator.
pub async fn delete_post(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let post = state.repo.get_post(post_id).await?.ok_or(ApiError::NotFound)?;

    let required = state.repo.get_role_by_name(DELETE_POST_ROLE).await?;
    authorize_post_access(&auth, post.user_id, &required)?;

    state.repo.delete_post(post_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Comments ---

/// [Authenticated Route] Comments on a post.
pub async fn create_comment(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(post_id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<Comment>), ApiError> {
    require_text("content", &payload.content, 1000)?;

    // Existence check up front so a missing post is a clean 404 rather than
    // a foreign-key error from the insert.
    state.repo.get_post(post_id).await?.ok_or(ApiError::NotFound)?;

    let comment = state
        .repo
        .create_comment(post_id, auth.id, &payload.content)
        .await?;

    Ok((StatusCode::CREATED, Json(comment)))
}

// --- Input validation & credential helpers ---

fn require_text(field: &str, value: &str, max: usize) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} is required")));
    }
    if value.len() > max {
        return Err(ApiError::Validation(format!(
            "{field} must be at most {max} characters"
        )));
    }
    Ok(())
}

fn validate_feed_query(query: FeedQuery) -> Result<FeedPage, ApiError> {
    let limit = query.limit.unwrap_or(20);
    if !(1..=100).contains(&limit) {
        return Err(ApiError::Validation(
            "limit must be between 1 and 100".to_string(),
        ));
    }

    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(ApiError::Validation("offset must not be negative".to_string()));
    }

    let sort_desc = match query.sort.as_deref() {
        None | Some("desc") => true,
        Some("asc") => false,
        Some(_) => {
            return Err(ApiError::Validation(
                "sort must be either asc or desc".to_string(),
            ));
        }
    };

    let search = query.search.unwrap_or_default();
    if search.len() > 100 {
        return Err(ApiError::Validation(
            "search must be at most 100 characters".to_string(),
        ));
    }

    Ok(FeedPage {
        limit,
        offset,
        search,
        sort_desc,
    })
}

fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(e.to_string()))
}

fn verify_password(password: &str, stored_hash: &str) -> Result<(), ApiError> {
    // A hash that fails to parse is our data problem (500); a hash that
    // fails to verify is the caller's (401).
    let parsed = PasswordHash::new(stored_hash).map_err(|e| ApiError::Internal(e.to_string()))?;
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .map_err(|_| ApiError::Unauthorized)
}

/// One-way digest under which invitation tokens are stored: the plaintext
/// never touches the database.
pub fn invitation_token_hash(plain: &str) -> String {
    hex::encode(Sha256::digest(plain.as_bytes()))
}
