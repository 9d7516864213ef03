// Per-session rate limiting for the code execution route

use std::num::NonZeroU32;
use std::sync::Arc;

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use tracing::warn;

use super::SESSION_HEADER;
use crate::models::AppState;
use crate::types::AppError;

#[derive(Clone)]
pub struct SessionRateLimiter {
    inner: Arc<DefaultKeyedRateLimiter<String>>,
}

impl SessionRateLimiter {
    pub fn per_minute(requests: u32) -> Self {
        let quota = Quota::per_minute(NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN));
        Self {
            inner: Arc::new(RateLimiter::keyed(quota)),
        }
    }

    pub fn check(&self, key: &str) -> bool {
        self.inner.check_key(&key.to_string()).is_ok()
    }

    /// Drops state for keys that have been idle long enough to be full again.
    pub fn shrink(&self) {
        self.inner.retain_recent();
        self.inner.shrink_to_fit();
    }
}

/// Requests without a session header share the `anonymous` bucket; the
/// session extractor rejects them afterwards anyway.
pub async fn rate_limiter_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let key = req
        .headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("anonymous")
        .to_string();
    if !state.limiter.check(&key) {
        warn!(session = %key, path = %req.uri().path(), "rate limit exceeded");
        return AppError::TooManyRequests.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_have_separate_buckets() {
        let limiter = SessionRateLimiter::per_minute(2);
        assert!(limiter.check("a"));
        assert!(limiter.check("a"));
        assert!(!limiter.check("a"));
        assert!(limiter.check("b"));
    }
}
