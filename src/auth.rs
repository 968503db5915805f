use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    cache::{UserCacheState, resolve_user},
    error::ApiError,
    models::Role,
    repository::RepositoryState,
};

/// Claims
///
/// The payload carried inside every bearer token issued by this service.
/// All six registered claims are mandatory: validation rejects tokens that
/// omit any of them.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// Subject: the principal's user id.
    pub sub: i64,
    /// Issuer; this service issues for itself.
    pub iss: String,
    /// Audience; equals the issuer in this single-service deployment.
    pub aud: String,
    /// Issued-at (unix seconds).
    pub iat: usize,
    /// Not-before (unix seconds).
    pub nbf: usize,
    /// Expiry (unix seconds). Mandatory.
    pub exp: usize,
}

/// Token validation failure classes. Every class maps to 401 at the HTTP
/// boundary; the distinction exists for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AuthTokenError {
    /// The token string could not be parsed at all.
    #[error("malformed token")]
    Malformed,
    /// The token parsed but its expiry is in the past.
    #[error("expired token")]
    ExpiredToken,
    /// Signature verification failed, including tokens signed with any
    /// algorithm other than the configured one.
    #[error("signature mismatch")]
    SignatureMismatch,
    /// A registered claim is missing, not yet valid, or does not match the
    /// configured issuer/audience.
    #[error("claim mismatch")]
    ClaimMismatch,
}

/// TokenAuthenticator
///
/// Issues and validates HS256-signed bearer tokens. Validation is pure: it
/// performs no I/O and has no side effects, so it can run before any
/// database work. The accepted algorithm is fixed at construction; tokens
/// signed with any other algorithm are rejected rather than downgraded.
#[derive(Clone)]
pub struct TokenAuthenticator {
    secret: String,
    iss: String,
    aud: String,
    exp: Duration,
}

impl TokenAuthenticator {
    pub fn new(secret: String, iss: String, aud: String, exp: Duration) -> Self {
        Self {
            secret,
            iss,
            aud,
            exp,
        }
    }

    /// Produces a signed token for the given subject, stamped with the
    /// configured issuer, audience and lifetime.
    pub fn issue(&self, sub: i64) -> Result<String, ApiError> {
        let now = Utc::now().timestamp() as usize;
        let claims = Claims {
            sub,
            iss: self.iss.clone(),
            aud: self.aud.clone(),
            iat: now,
            nbf: now,
            exp: now + self.exp.as_secs() as usize,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| ApiError::Internal(e.to_string()))
    }

    /// Parses and verifies a token string: HS256 signature, issuer,
    /// audience, not-before, and a mandatory expiry.
    pub fn validate(&self, token: &str) -> Result<Claims, AuthTokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.iss]);
        validation.set_audience(&[&self.aud]);
        validation.set_required_spec_claims(&["exp", "iss", "aud"]);
        validation.validate_nbf = true;

        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| match e.kind() {
            ErrorKind::ExpiredSignature => AuthTokenError::ExpiredToken,
            ErrorKind::InvalidSignature | ErrorKind::InvalidAlgorithm => {
                AuthTokenError::SignatureMismatch
            }
            ErrorKind::InvalidAudience
            | ErrorKind::InvalidIssuer
            | ErrorKind::ImmatureSignature
            | ErrorKind::MissingRequiredClaim(_) => AuthTokenError::ClaimMismatch,
            _ => AuthTokenError::Malformed,
        })
    }
}

/// AuthUser
///
/// The resolved identity of an authenticated request: the terminal state of
/// the per-request pipeline `token validated -> principal resolved`.
/// Handlers receive it as an extractor argument; identity never travels
/// through process-wide state.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub id: i64,
    pub username: String,
    pub role: Role,
}

/// AuthUser Extractor Implementation
///
/// 1. Extract the `Authorization: Bearer` header; absence is a 401.
/// 2. Validate the token (signature, algorithm, issuer, audience, expiry).
/// 3. Resolve the principal by subject id through the user cache
///    (read-through to the primary store). A valid token whose subject no
///    longer exists means the token outlived its user: also a 401.
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    RepositoryState: FromRef<S>,
    UserCacheState: FromRef<S>,
    TokenAuthenticator: FromRef<S>,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // The auth middleware stashes the resolved principal in the request
        // extensions; handler-level extraction reuses it instead of
        // re-running validation and another principal lookup.
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }

        let repo = RepositoryState::from_ref(state);
        let cache = UserCacheState::from_ref(state);
        let authenticator = TokenAuthenticator::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or(ApiError::Unauthorized)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(ApiError::Unauthorized)?;

        let claims = authenticator.validate(token)?;

        let user = resolve_user(&repo, &cache, claims.sub)
            .await?
            .ok_or(ApiError::Unauthorized)?;

        Ok(AuthUser {
            id: user.id,
            username: user.username,
            role: user.role,
        })
    }
}

/// authorize_post_access
///
/// The fixed two-rule decision for mutating post routes: the request is
/// allowed iff the principal owns the post, or the principal's role level
/// meets the route's required level. Not a policy engine; there are no
/// other rules.
pub fn authorize_post_access(
    principal: &AuthUser,
    post_owner: i64,
    required: &Role,
) -> Result<(), ApiError> {
    if principal.id == post_owner || principal.role.satisfies(required) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}
