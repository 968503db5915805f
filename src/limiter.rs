use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{AppState, error::ApiError};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    /// Rejected; `retry_after` is the time remaining until the next window
    /// boundary, surfaced to the client via the Retry-After header.
    Limited { retry_after: Duration },
}

/// RateLimiter
///
/// Admission control strategy, selected once at startup. Call sites stay
/// unconditional: when rate limiting is configured off, the no-op
/// implementation is wired in instead of scattering enabled-checks.
pub trait RateLimiter: Send + Sync {
    fn check(&self, key: &str) -> Decision;
}

/// The shared limiter handle stored in the application state.
pub type RateLimiterState = Arc<dyn RateLimiter>;

/// Pass-through limiter used when admission control is disabled.
pub struct NoopLimiter;

impl RateLimiter for NoopLimiter {
    fn check(&self, _key: &str) -> Decision {
        Decision::Allowed
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: u64,
    count: u32,
}

/// FixedWindowLimiter
///
/// Per-key fixed-window counter. Window boundaries are aligned to wall-clock
/// multiples of the window length; when a request arrives in a new window
/// the stored counter resets before incrementing. Reset and increment happen
/// under the DashMap entry guard, so concurrent requests for the same key
/// never lose updates.
///
/// Fixed windows admit up to 2x the limit across a boundary (limit requests
/// at the end of one window plus limit at the start of the next). That burst
/// is an accepted property of the algorithm, not a defect.
pub struct FixedWindowLimiter {
    limit: u32,
    window_ms: u64,
    windows: DashMap<String, Window>,
}

impl FixedWindowLimiter {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window_ms: window.as_millis().max(1) as u64,
            windows: DashMap::new(),
        }
    }

    /// Core admission check against an explicit clock, in unix milliseconds.
    /// Exists separately from `check` so window rollover can be tested
    /// without sleeping.
    pub fn check_at(&self, key: &str, now_ms: u64) -> Decision {
        let window_start = now_ms - now_ms % self.window_ms;

        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            start_ms: window_start,
            count: 0,
        });

        // Crossing into a new window resets the counter. This runs under the
        // entry lock together with the increment below.
        if entry.start_ms != window_start {
            entry.start_ms = window_start;
            entry.count = 0;
        }

        entry.count += 1;

        if entry.count > self.limit {
            let remaining = entry.start_ms + self.window_ms - now_ms;
            Decision::Limited {
                retry_after: Duration::from_millis(remaining),
            }
        } else {
            Decision::Allowed
        }
    }

    /// Drops entries whose window ended more than one full window ago, so
    /// long-idle client keys do not accumulate unbounded state. Intended to
    /// run from a periodic sweeper task.
    pub fn sweep(&self) {
        let now_ms = unix_ms();
        self.sweep_at(now_ms);
    }

    fn sweep_at(&self, now_ms: u64) {
        let horizon = 2 * self.window_ms;
        self.windows
            .retain(|_, w| now_ms < w.start_ms.saturating_add(horizon));
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &str) -> Decision {
        self.check_at(key, unix_ms())
    }
}

fn unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// rate_limit_middleware
///
/// The first filter in the request pipeline, layered ahead of authentication
/// so rejected bursts never reach token validation or the database. Rejected
/// requests short-circuit with 429 and a Retry-After hint.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let key = client_key(&request);

    match state.limiter.check(&key) {
        Decision::Allowed => next.run(request).await,
        Decision::Limited { retry_after } => {
            ApiError::RateLimited { retry_after }.into_response()
        }
    }
}

/// Derives the per-client admission key: the first hop of x-forwarded-for
/// when present (deployments behind a proxy), otherwise the peer address.
fn client_key(request: &Request) -> String {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
    {
        let first_hop = forwarded.trim();
        if !first_hop.is_empty() {
            return first_hop.to_string();
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
