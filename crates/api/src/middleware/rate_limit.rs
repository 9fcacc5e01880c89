//! Per-identity rate limiting.

use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use governor::{
    clock::{Clock, DefaultClock},
    state::{InMemoryState, NotKeyed},
    Quota, RateLimiter as GovRateLimiter,
};
use serde_json::json;
use std::{
    collections::HashMap,
    num::NonZeroU32,
    sync::{Arc, PoisonError, RwLock},
};
use uuid::Uuid;

use crate::app::AppState;
use domain::models::Identity;

type IdentityRateLimiter = GovRateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// One token bucket per identity, created on first use.
pub struct RateLimiterState {
    limiters: RwLock<HashMap<Uuid, Arc<IdentityRateLimiter>>>,
    rate_limit_per_minute: u32,
    clock: DefaultClock,
}

impl RateLimiterState {
    pub fn new(rate_limit_per_minute: u32) -> Self {
        Self {
            limiters: RwLock::new(HashMap::new()),
            rate_limit_per_minute,
            clock: DefaultClock::default(),
        }
    }

    pub fn limit(&self) -> u32 {
        self.rate_limit_per_minute
    }

    fn limiter_for(&self, identity_id: Uuid) -> Arc<IdentityRateLimiter> {
        {
            let limiters = self.limiters.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(limiter) = limiters.get(&identity_id) {
                return Arc::clone(limiter);
            }
        }

        let mut limiters = self.limiters.write().unwrap_or_else(PoisonError::into_inner);
        let quota = Quota::per_minute(
            NonZeroU32::new(self.rate_limit_per_minute).unwrap_or(NonZeroU32::MIN),
        );
        Arc::clone(
            limiters
                .entry(identity_id)
                .or_insert_with(|| Arc::new(GovRateLimiter::direct(quota))),
        )
    }

    /// `Err(retry_after_secs)` when the identity has exhausted its budget.
    pub fn check(&self, identity_id: Uuid) -> Result<(), u64> {
        self.limiter_for(identity_id).check().map_err(|not_until| {
            not_until
                .wait_time_from(self.clock.now())
                .as_secs()
                .max(1)
        })
    }

    pub fn tracked_identities(&self) -> usize {
        self.limiters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for RateLimiterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterState")
            .field("rate_limit_per_minute", &self.rate_limit_per_minute)
            .field("tracked_identities", &self.tracked_identities())
            .finish()
    }
}

/// Applies the per-identity budget. Must run after authentication.
pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let (Some(limiter), Some(identity_id)) = (
        state.rate_limiter.as_ref(),
        req.extensions().get::<Identity>().map(|i| i.id),
    ) else {
        return next.run(req).await;
    };

    if let Err(retry_after) = limiter.check(identity_id) {
        tracing::warn!(identity_id = %identity_id, retry_after, "Rate limit exceeded");
        metrics::counter!("rate_limited_requests_total").increment(1);
        return rate_limited_response(limiter.limit(), retry_after);
    }

    next.run(req).await
}

fn rate_limited_response(limit: u32, retry_after: u64) -> Response {
    let body = json!({
        "error": "rate_limited",
        "message": format!("Rate limit of {} requests/minute exceeded", limit),
        "retryAfter": retry_after
    });

    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limiter_allows_requests() {
        let state = RateLimiterState::new(100);
        assert!(state.check(Uuid::new_v4()).is_ok());
    }

    #[test]
    fn test_rate_limiter_exhaustion() {
        let state = RateLimiterState::new(5);
        let identity = Uuid::new_v4();

        for _ in 0..5 {
            assert!(state.check(identity).is_ok());
        }
        let retry_after = state.check(identity).unwrap_err();
        assert!(retry_after >= 1);
    }

    #[test]
    fn test_identities_have_separate_budgets() {
        let state = RateLimiterState::new(1);
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();

        assert!(state.check(first).is_ok());
        assert!(state.check(first).is_err());
        assert!(state.check(second).is_ok());
        assert_eq!(state.tracked_identities(), 2);
    }

    #[test]
    fn test_rate_limited_response_headers() {
        let response = rate_limited_response(60, 7);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get(header::RETRY_AFTER).unwrap(), "7");
    }
}
