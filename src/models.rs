use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// --- Core Application Schemas (Mapped to Database) ---

/// Role
///
/// A named rank in the authorization hierarchy, stored in the `roles` table
/// and surfaced to clients as `{id, name, level, description}`.
///
/// The `level` field imposes a total order over roles (user < moderator <
/// admin). Access decisions compare levels numerically and never compare
/// role names; two roles with equal levels are interchangeable for
/// authorization purposes regardless of their names.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default, PartialEq)]
pub struct Role {
    pub id: i64,
    pub name: String,
    pub level: i32,
    pub description: Option<String>,
}

impl Role {
    /// True when this role ranks at or above `required`. Comparison is by
    /// `level` only.
    pub fn satisfies(&self, required: &Role) -> bool {
        self.level >= required.level
    }
}

/// User
///
/// The canonical principal record from the `users` table, joined with its
/// role. Cached copies of this struct (see `cache::UserCache`) are disposable
/// projections; the `users` table is always the source of truth.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    /// Argon2 PHC string. Never serialized: it is excluded from API
    /// responses and from cache snapshots alike.
    #[serde(skip)]
    pub password_hash: String,
    pub role: Role,
    /// Inactive until the invitation token is consumed.
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Post
///
/// A mutable resource guarded by optimistic concurrency. `version` starts at
/// 0 on insert and increases only through the conditional update in
/// `Repository::update_post`; stale writers receive a conflict, never a
/// silent overwrite.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Post {
    pub id: i64,
    /// Owner; authorization on mutating routes checks this against the
    /// authenticated principal.
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Comment
///
/// A comment row enriched with the author's username (a join in the
/// repository query).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct Comment {
    pub id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
}

/// FeedItem
///
/// One entry of a user's follower feed: a post plus its author and comment
/// count, produced by a single aggregate query.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, Default)]
pub struct FeedItem {
    pub id: i64,
    pub user_id: i64,
    pub username: String,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
    pub version: i32,
    pub created_at: DateTime<Utc>,
    pub comments_count: i64,
}

// --- Request Payloads (Input Schemas) ---

/// Input payload for registration (POST /authentication/user).
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
    pub password: String,
}

/// Input payload for issuing a token (POST /authentication/token).
#[derive(Debug, Clone, Deserialize)]
pub struct CreateTokenRequest {
    pub email: String,
    pub password: String,
}

/// Input payload for creating a post (POST /posts).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CreatePostRequest {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// UpdatePostRequest
///
/// Partial update payload for PATCH /posts/{id}. The caller must echo back
/// the `version` it last observed; the update only succeeds if that version
/// is still current (optimistic concurrency).
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct UpdatePostRequest {
    pub title: Option<String>,
    pub content: Option<String>,
    pub version: i32,
}

/// Input payload for commenting on a post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCommentRequest {
    pub content: String,
}

/// FeedQuery
///
/// Pagination and filtering parameters for GET /users/feed. `sort` accepts
/// only "asc" or "desc"; anything else is rejected during validation.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FeedQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

// --- Response Schemas (Output) ---

/// Registration response: the created (inactive) user plus the plaintext
/// invitation token the client must present to activate the account. Only
/// the one-way hash of this token is persisted.
#[derive(Debug, Clone, Serialize)]
pub struct UserWithToken {
    #[serde(flatten)]
    pub user: User,
    pub token: String,
}

/// Login response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub token: String,
}

/// A post together with its comments (GET /posts/{id}).
#[derive(Debug, Clone, Serialize)]
pub struct PostDetail {
    #[serde(flatten)]
    pub post: Post,
    pub comments: Vec<Comment>,
}
