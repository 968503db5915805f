//! Shared test fixtures: an in-memory Repository, a counting user cache and
//! helpers to assemble an application state and drive the router without any
//! external services.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tower::ServiceExt;

use rsocial::{
    AppState, NoopLimiter, NoopUserCache, RateLimiterState, RepositoryState, TokenAuthenticator,
    UserCacheState,
    cache::UserCache,
    config::AppConfig,
    models::{Comment, FeedItem, Post, Role, User},
    repository::{FeedPage, NewPost, NewUser, Repository, StoreError},
};

pub fn role(name: &str, level: i32) -> Role {
    Role {
        id: level as i64,
        name: name.to_string(),
        level,
        description: None,
    }
}

pub fn user_role() -> Role {
    role("user", 1)
}

pub fn moderator_role() -> Role {
    role("moderator", 2)
}

pub fn admin_role() -> Role {
    role("admin", 3)
}

#[derive(Default)]
struct MockTables {
    users: HashMap<i64, User>,
    // token hash -> (user id, expiry)
    invitations: HashMap<String, (i64, DateTime<Utc>)>,
    posts: HashMap<i64, Post>,
    comments: Vec<Comment>,
    // (follower id, followed id)
    follows: HashSet<(i64, i64)>,
    next_id: i64,
}

impl MockTables {
    fn allocate_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

/// In-memory Repository used by handler and router tests. A single async
/// mutex linearizes every operation the way row-level locking does in the
/// real store, which is exactly what the conditional-update tests rely on.
pub struct MockRepository {
    tables: tokio::sync::Mutex<MockTables>,
    get_user_calls: AtomicUsize,
}

impl MockRepository {
    pub fn new() -> Self {
        Self {
            tables: tokio::sync::Mutex::new(MockTables::default()),
            get_user_calls: AtomicUsize::new(0),
        }
    }

    /// Number of primary-store reads served by `get_user`, for asserting
    /// cache hit behavior.
    pub fn get_user_calls(&self) -> usize {
        self.get_user_calls.load(Ordering::SeqCst)
    }

    /// Inserts an active user with the given role, bypassing the
    /// registration flow.
    pub async fn seed_user(&self, id: i64, username: &str, role: Role) -> User {
        let user = User {
            id,
            username: username.to_string(),
            email: format!("{username}@example.com"),
            password_hash: String::new(),
            role,
            is_active: true,
            created_at: Utc::now(),
        };
        let mut tables = self.tables.lock().await;
        tables.users.insert(id, user.clone());
        tables.next_id = tables.next_id.max(id);
        user
    }

    pub async fn seed_post(&self, id: i64, owner: i64, title: &str) -> Post {
        let now = Utc::now();
        let post = Post {
            id,
            user_id: owner,
            title: title.to_string(),
            content: "content".to_string(),
            tags: vec![],
            version: 0,
            created_at: now,
            updated_at: now,
        };
        let mut tables = self.tables.lock().await;
        tables.posts.insert(id, post.clone());
        tables.next_id = tables.next_id.max(id);
        post
    }

    /// Marks every stored user active, for tests that do not exercise the
    /// invitation flow.
    pub async fn activate_all(&self) {
        let mut tables = self.tables.lock().await;
        for user in tables.users.values_mut() {
            user.is_active = true;
        }
    }

    pub async fn deactivate_user(&self, id: i64) {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.get_mut(&id) {
            user.is_active = false;
        }
    }

    pub async fn stored_user(&self, id: i64) -> Option<User> {
        self.tables.lock().await.users.get(&id).cloned()
    }
}

#[async_trait]
impl Repository for MockRepository {
    async fn create_and_invite(
        &self,
        user: NewUser,
        token_hash: &str,
        exp: Duration,
    ) -> Result<User, StoreError> {
        let mut tables = self.tables.lock().await;

        let duplicate = tables
            .users
            .values()
            .any(|u| u.username == user.username || u.email == user.email);
        if duplicate {
            return Err(StoreError::Conflict);
        }

        let id = tables.allocate_id();
        let created = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            role: user_role(),
            is_active: false,
            created_at: Utc::now(),
        };
        tables.users.insert(id, created.clone());

        let expiry = Utc::now() + chrono::Duration::seconds(exp.as_secs() as i64);
        tables
            .invitations
            .insert(token_hash.to_string(), (id, expiry));

        Ok(created)
    }

    async fn get_user(&self, id: i64) -> Result<Option<User>, StoreError> {
        self.get_user_calls.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&id).filter(|u| u.is_active).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.email == email && u.is_active)
            .cloned())
    }

    async fn activate_user(&self, token_hash: &str) -> Result<i64, StoreError> {
        let mut tables = self.tables.lock().await;

        let (user_id, expiry) = tables
            .invitations
            .get(token_hash)
            .copied()
            .ok_or(StoreError::NotFound)?;
        if expiry <= Utc::now() {
            return Err(StoreError::NotFound);
        }

        tables.invitations.remove(token_hash);
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.is_active = true;
        }
        Ok(user_id)
    }

    async fn get_role_by_name(&self, name: &str) -> Result<Role, StoreError> {
        match name {
            "user" => Ok(user_role()),
            "moderator" => Ok(moderator_role()),
            "admin" => Ok(admin_role()),
            _ => Err(StoreError::NotFound),
        }
    }

    async fn create_post(&self, post: NewPost) -> Result<Post, StoreError> {
        let mut tables = self.tables.lock().await;
        let id = tables.allocate_id();
        let now = Utc::now();
        let created = Post {
            id,
            user_id: post.user_id,
            title: post.title,
            content: post.content,
            tags: post.tags,
            version: 0,
            created_at: now,
            updated_at: now,
        };
        tables.posts.insert(id, created.clone());
        Ok(created)
    }

    async fn get_post(&self, id: i64) -> Result<Option<Post>, StoreError> {
        Ok(self.tables.lock().await.posts.get(&id).cloned())
    }

    async fn update_post(
        &self,
        id: i64,
        title: &str,
        content: &str,
        expected_version: i32,
    ) -> Result<i32, StoreError> {
        let mut tables = self.tables.lock().await;

        // Same contract as the conditional UPDATE: a missing row and a stale
        // version are indistinguishable, both match zero rows.
        match tables.posts.get_mut(&id) {
            Some(post) if post.version == expected_version => {
                post.title = title.to_string();
                post.content = content.to_string();
                post.version += 1;
                post.updated_at = Utc::now();
                Ok(post.version)
            }
            _ => Err(StoreError::Conflict),
        }
    }

    async fn delete_post(&self, id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.posts.remove(&id).ok_or(StoreError::NotFound)?;
        tables.comments.retain(|c| c.post_id != id);
        Ok(())
    }

    async fn get_user_feed(
        &self,
        user_id: i64,
        page: &FeedPage,
    ) -> Result<Vec<FeedItem>, StoreError> {
        let tables = self.tables.lock().await;

        let mut items: Vec<FeedItem> = tables
            .posts
            .values()
            .filter(|p| p.user_id == user_id || tables.follows.contains(&(user_id, p.user_id)))
            .filter(|p| {
                page.search.is_empty()
                    || p.title.contains(&page.search)
                    || p.content.contains(&page.search)
            })
            .map(|p| FeedItem {
                id: p.id,
                user_id: p.user_id,
                username: tables
                    .users
                    .get(&p.user_id)
                    .map(|u| u.username.clone())
                    .unwrap_or_default(),
                title: p.title.clone(),
                content: p.content.clone(),
                tags: p.tags.clone(),
                version: p.version,
                created_at: p.created_at,
                comments_count: tables.comments.iter().filter(|c| c.post_id == p.id).count()
                    as i64,
            })
            .collect();

        items.sort_by_key(|item| item.created_at);
        if page.sort_desc {
            items.reverse();
        }

        Ok(items
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .collect())
    }

    async fn follow(&self, follower_id: i64, user_id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.users.contains_key(&user_id) {
            return Err(StoreError::NotFound);
        }
        if !tables.follows.insert((follower_id, user_id)) {
            return Err(StoreError::Conflict);
        }
        Ok(())
    }

    async fn unfollow(&self, follower_id: i64, user_id: i64) -> Result<(), StoreError> {
        let mut tables = self.tables.lock().await;
        tables.follows.remove(&(follower_id, user_id));
        Ok(())
    }

    async fn create_comment(
        &self,
        post_id: i64,
        user_id: i64,
        content: &str,
    ) -> Result<Comment, StoreError> {
        let mut tables = self.tables.lock().await;
        if !tables.posts.contains_key(&post_id) {
            return Err(StoreError::NotFound);
        }

        let id = tables.allocate_id();
        let comment = Comment {
            id,
            post_id,
            user_id,
            content: content.to_string(),
            created_at: Utc::now(),
            username: tables
                .users
                .get(&user_id)
                .map(|u| u.username.clone())
                .unwrap_or_default(),
        };
        tables.comments.push(comment.clone());
        Ok(comment)
    }

    async fn get_comments(&self, post_id: i64) -> Result<Vec<Comment>, StoreError> {
        let tables = self.tables.lock().await;
        let mut comments: Vec<Comment> = tables
            .comments
            .iter()
            .filter(|c| c.post_id == post_id)
            .cloned()
            .collect();
        comments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(comments)
    }
}

/// In-memory UserCache with real store/hit semantics, unlike the no-op.
#[derive(Default)]
pub struct MemoryUserCache {
    entries: std::sync::Mutex<HashMap<i64, User>>,
}

impl MemoryUserCache {
    pub fn contains(&self, user_id: i64) -> bool {
        self.entries.lock().unwrap().contains_key(&user_id)
    }
}

#[async_trait]
impl UserCache for MemoryUserCache {
    async fn get(&self, user_id: i64) -> Option<User> {
        self.entries.lock().unwrap().get(&user_id).cloned()
    }

    async fn set(&self, user: &User) {
        self.entries.lock().unwrap().insert(user.id, user.clone());
    }

    async fn invalidate(&self, user_id: i64) {
        self.entries.lock().unwrap().remove(&user_id);
    }
}

// --- State and router assembly ---

pub fn test_authenticator() -> TokenAuthenticator {
    let config = AppConfig::default();
    TokenAuthenticator::new(
        config.auth.secret.clone(),
        config.auth.iss.clone(),
        config.auth.iss.clone(),
        config.auth.exp,
    )
}

pub fn state_with(
    repo: Arc<MockRepository>,
    cache: UserCacheState,
    limiter: RateLimiterState,
) -> AppState {
    AppState {
        repo: repo as RepositoryState,
        cache,
        authenticator: test_authenticator(),
        limiter,
        config: AppConfig::default(),
    }
}

/// Default state: no-op cache, no rate limiting.
pub fn test_state(repo: Arc<MockRepository>) -> AppState {
    state_with(repo, Arc::new(NoopUserCache), Arc::new(NoopLimiter))
}

pub fn bearer(state: &AppState, user_id: i64) -> String {
    let token = state
        .authenticator
        .issue(user_id)
        .expect("token issuance should not fail in tests");
    format!("Bearer {token}")
}

/// Sends one request through a clone of the router and returns the status
/// plus the parsed JSON body (Null for empty bodies).
pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    auth: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }

    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };

    (status, json)
}
