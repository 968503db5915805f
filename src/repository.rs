use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use std::time::Duration;

use crate::models::{Comment, FeedItem, Post, Role, User};

/// Typed persistence failures. The HTTP layer performs exactly one mapping
/// step from these to statuses (404, 409, 500); no SQL detail leaks upward.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,
    /// Duplicate identity fields, duplicate follow edge, or a conditional
    /// update that matched zero rows (stale version or vanished row).
    #[error("resource already exists")]
    Conflict,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// New-user input for `create_and_invite`. The password arrives pre-hashed;
/// the repository never sees a plaintext credential.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// New-post input for `create_post`.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub tags: Vec<String>,
}

/// Validated pagination for the follower feed.
#[derive(Debug, Clone)]
pub struct FeedPage {
    pub limit: i64,
    pub offset: i64,
    pub search: String,
    pub sort_desc: bool,
}

impl Default for FeedPage {
    fn default() -> Self {
        Self {
            limit: 20,
            offset: 0,
            search: String::new(),
            sort_desc: true,
        }
    }
}

/// Repository
///
/// The abstract contract for all persistence operations. Handlers interact
/// with the data layer only through this trait, which keeps them testable
/// against in-memory implementations.
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) safely shareable across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Users ---

    /// Inserts an inactive user together with its invitation token hash, in
    /// one transaction. Duplicate username or email surfaces as `Conflict`.
    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        exp: Duration,
    ) -> Result<User, StoreError>;

    /// Fetches an *active* user with its role. `Ok(None)` when the id is
    /// unknown or the account has not been activated.
    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError>;

    /// Active-user lookup for the login path.
    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Consumes an invitation: marks the user active and deletes the token,
    /// atomically. An unknown or expired token is `NotFound`; a token can
    /// therefore be redeemed at most once. Returns the activated user id.
    async fn activate_user(&self, token_hash: &str) -> Result<i64, StoreError>;

    /// Resolves a role (and thus its level) by name, for route-level
    /// authorization requirements.
    async fn get_role_by_name(&self, name: &str) -> Result<Role, StoreError>;

    // --- Posts ---

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError>;

    async fn get_post(&self, id: i64) -> Result<Option<Post>, StoreError>;

    /// Version-guarded update: a single conditional write that increments
    /// `version` only when the caller's observed version is still current.
    /// Zero matched rows (stale version or missing row) is `Conflict`, and
    /// the store never retries on the caller's behalf. Returns the new
    /// version. Concurrent writers race on the database's row-level
    /// atomicity alone; exactly one of them wins.
    async fn update_post(
        &self,
        id: i64,
        title: &str,
        content: &str,
        expected_version: i32,
    ) -> Result<i32, StoreError>;

    async fn delete_post(&self, id: i64) -> Result<(), StoreError>;

    /// Posts from followed users (and the user's own), newest first by
    /// default, with comment counts.
    async fn get_user_feed(&self, user_id: i64, page: &FeedPage)
    -> Result<Vec<FeedItem>, StoreError>;

    // --- Followers ---

    /// Creates a follow edge. An existing edge is `Conflict`: following is
    /// deliberately not idempotent, the caller decides how to interpret a
    /// duplicate.
    async fn follow(&self, follower_id: i64, user_id: i64) -> Result<(), StoreError>;

    /// Removes a follow edge. Removing an absent edge is Ok: unfollowing is
    /// idempotent by design.
    async fn unfollow(&self, follower_id: i64, user_id: i64) -> Result<(), StoreError>;

    // --- Comments ---

    async fn create_comment(
        &self,
        post_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Comment, StoreError>;

    async fn get_comments(&self, post_id: i64) -> Result<Vec<Comment>, StoreError>;
}

/// The concrete type used to share the persistence layer across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

/// PostgresRepository
///
/// The production implementation, backed by a PostgreSQL pool. Every
/// mutation is a single statement (or a single short transaction), so a
/// request cancelled mid-flight never leaves a partial multi-step write
/// visible.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Shared projection for user rows joined with their role. Role columns are
// aliased to avoid colliding with the user's own id/name.
const USER_SELECT: &str = "\
    SELECT u.id, u.username, u.email, u.password, u.is_active, u.created_at, \
           r.id AS role_id, r.name AS role_name, r.level AS role_level, \
           r.description AS role_description \
    FROM users u JOIN roles r ON u.role_id = r.id";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: i64,
    username: String,
    email: String,
    password: String,
    is_active: bool,
    created_at: chrono::DateTime<Utc>,
    role_id: i64,
    role_name: String,
    role_level: i32,
    role_description: Option<String>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        User {
            id: row.id,
            username: row.username,
            email: row.email,
            password_hash: row.password,
            role: Role {
                id: row.role_id,
                name: row.role_name,
                level: row.role_level,
                description: row.role_description,
            },
            is_active: row.is_active,
            created_at: row.created_at,
        }
    }
}

/// Maps Postgres constraint violations to domain failures: a unique
/// violation (23505) is `Conflict`, a foreign-key violation (23503) means
/// the referenced row is gone and is `NotFound`. Everything else stays a
/// database error.
fn map_constraint_violation(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23505") => StoreError::Conflict,
        sqlx::Error::Database(db) if db.code().as_deref() == Some("23503") => StoreError::NotFound,
        _ => StoreError::Database(err),
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        exp: Duration,
    ) -> Result<User, StoreError> {
        let mut tx = self.pool.begin().await?;

        let role: Role =
            sqlx::query_as("SELECT id, name, level, description FROM roles WHERE name = 'user'")
                .fetch_one(&mut *tx)
                .await?;

        let row = sqlx::query(
            "INSERT INTO users (username, email, password, role_id) \
             VALUES ($1, $2, $3, $4) RETURNING id, created_at",
        )
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(role.id)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_constraint_violation)?;

        let id: i64 = row.get("id");
        let created_at: chrono::DateTime<Utc> = row.get("created_at");

        let expiry = Utc::now() + chrono::Duration::seconds(exp.as_secs() as i64);
        sqlx::query("INSERT INTO user_invitations (token, user_id, expiry) VALUES ($1, $2, $3)")
            .bind(token_hash)
            .bind(id)
            .bind(expiry)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role,
            is_active: false,
            created_at,
        })
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("{USER_SELECT} WHERE u.id = $1 AND u.is_active = true"))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(User::from))
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            "{USER_SELECT} WHERE u.email = $1 AND u.is_active = true"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(User::from))
    }

    async fn activate_user(&self, token_hash: &str) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        // An expired invitation is indistinguishable from a consumed one:
        // both are NotFound to the caller.
        let row = sqlx::query(
            "SELECT u.id FROM users u \
             JOIN user_invitations i ON u.id = i.user_id \
             WHERE i.token = $1 AND i.expiry > now()",
        )
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

        let user_id: i64 = row.get("id");

        sqlx::query("UPDATE users SET is_active = true WHERE id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query("DELETE FROM user_invitations WHERE user_id = $1")
            .bind(user_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(user_id)
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Role, StoreError> {
        sqlx::query_as("SELECT id, name, level, description FROM roles WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(StoreError::NotFound)
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let created: Post = sqlx::query_as(
            "INSERT INTO posts (user_id, title, content, tags) \
             VALUES ($1, $2, $3, $4) \
             RETURNING id, user_id, title, content, tags, version, created_at, updated_at",
        )
        .bind(post.user_id)
        .bind(&post.title)
        .bind(&post.content)
        .bind(&post.tags)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        let post: Option<Post> = sqlx::query_as(
            "SELECT id, user_id, title, content, tags, version, created_at, updated_at \
             FROM posts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(post)
    }

    async fn update_post(
        &self,
        id: i64,
        title: &str,
        content: &str,
        expected_version: i32,
    ) -> Result<i32, StoreError> {
        // The whole optimistic-concurrency guarantee lives in this one
        // conditional statement; no application lock backs it up.
        let row = sqlx::query(
            "UPDATE posts \
             SET title = $1, content = $2, version = version + 1, updated_at = now() \
             WHERE id = $3 AND version = $4 \
             RETURNING version",
        )
        .bind(title)
        .bind(content)
        .bind(id)
        .bind(expected_version)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(row.get("version")),
            // Zero rows: the post vanished or someone else won the race.
            // Retryable by the caller after a re-fetch, never by us.
            None => Err(StoreError::Conflict),
        }
    }

    async fn delete_post(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn get_user_feed(
        &self,
        user_id: i64,
        page: &FeedPage,
    ) -> Result<Vec<FeedItem>, StoreError> {
        // `sort_desc` is a validated boolean, so the interpolated keyword
        // cannot carry user input.
        let order = if page.sort_desc { "DESC" } else { "ASC" };
        let query = format!(
            "SELECT p.id, p.user_id, COALESCE(u.username, '') AS username, \
                    p.title, p.content, p.tags, p.version, p.created_at, \
                    COUNT(c.id) AS comments_count \
             FROM posts p \
             LEFT JOIN comments c ON c.post_id = p.id \
             LEFT JOIN users u ON p.user_id = u.id \
             JOIN followers f ON f.user_id = p.user_id \
             WHERE (f.follower_id = $1 OR p.user_id = $1) \
               AND (p.title ILIKE '%' || $4 || '%' OR p.content ILIKE '%' || $4 || '%') \
             GROUP BY p.id, u.username \
             ORDER BY p.created_at {order} \
             LIMIT $2 OFFSET $3"
        );

        let feed: Vec<FeedItem> = sqlx::query_as(&query)
            .bind(user_id)
            .bind(page.limit)
            .bind(page.offset)
            .bind(&page.search)
            .fetch_all(&self.pool)
            .await?;

        Ok(feed)
    }

    async fn follow(&self, follower_id: i64, user_id: i64) -> Result<(), StoreError> {
        // The composite primary key enforces at-most-one edge per ordered
        // pair; a duplicate insert surfaces as Conflict, never as a silent
        // merge.
        sqlx::query("INSERT INTO followers (user_id, follower_id) VALUES ($1, $2)")
            .bind(user_id)
            .bind(follower_id)
            .execute(&self.pool)
            .await
            .map_err(map_constraint_violation)?;

        Ok(())
    }

    async fn unfollow(&self, follower_id: i64, user_id: i64) -> Result<(), StoreError> {
        // Deleting an absent edge affects zero rows and that is fine.
        sqlx::query("DELETE FROM followers WHERE user_id = $1 AND follower_id = $2")
            .bind(user_id)
            .bind(follower_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn create_comment(
        &self,
        post_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Comment, StoreError> {
        // CTE so the insert and the author join happen in one round trip.
        let comment: Comment = sqlx::query_as(
            "WITH inserted AS ( \
                 INSERT INTO comments (post_id, user_id, content) \
                 VALUES ($1, $2, $3) \
                 RETURNING id, post_id, user_id, content, created_at \
             ) \
             SELECT i.id, i.post_id, i.user_id, i.content, i.created_at, u.username \
             FROM inserted i JOIN users u ON i.user_id = u.id",
        )
        .bind(post_id)
        .bind(user_id)
        .bind(content)
        .fetch_one(&self.pool)
        .await
        .map_err(map_constraint_violation)?;

        Ok(comment)
    }

    async fn get_comments(&self, post_id: i64) -> Result<Vec<Comment>, StoreError> {
        let comments: Vec<Comment> = sqlx::query_as(
            "SELECT c.id, c.post_id, c.user_id, c.content, c.created_at, u.username \
             FROM comments c JOIN users u ON c.user_id = u.id \
             WHERE c.post_id = $1 \
             ORDER BY c.created_at DESC",
        )
        .bind(post_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(comments)
    }
}
