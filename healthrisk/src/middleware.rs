use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use warp::{Filter, Rejection};

use crate::error::{reject, ApiError};

pub fn cors() -> warp::cors::Builder {
    warp::cors()
        .allow_any_origin()
        .allow_headers(vec![
            "User-Agent",
            "Sec-Fetch-Mode",
            "Referer",
            "Origin",
            "Access-Control-Request-Method",
            "Access-Control-Request-Headers",
            "Content-Type",
            "Authorization",
            "Accept",
            "Content-Length",
            "X-User-Id",
        ])
        .allow_methods(vec!["POST", "GET", "OPTIONS", "DELETE", "PUT", "PATCH"])
}

pub type Limiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Process-wide quota shared by the model-backed routes.
pub fn rate_limiter(per_minute: u32) -> Limiter {
    let per_minute = NonZeroU32::new(per_minute).unwrap_or(NonZeroU32::MIN);
    Arc::new(RateLimiter::direct(Quota::per_minute(per_minute)))
}

/// Rejects with [`ApiError::RateLimitExceeded`] once the quota is spent.
pub fn rate_limited(limiter: Limiter) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::any()
        .and_then(move || {
            let limiter = limiter.clone();
            async move {
                limiter
                    .check()
                    .map_err(|_| reject(ApiError::RateLimitExceeded))
            }
        })
        .untuple_one()
}
