use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;

use crate::{error::AppError, state::AppState};

/// Window of the start limiter, in seconds.
const START_WINDOW_SECS: i64 = 3600;

/// Extracts the real IP address from the request extensions.
///
/// # Returns
///
/// The IP address as a string, or "unknown" if not found.
fn extract_real_ip(req: &Request<Body>) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Opens the window with its expiry (if absent) and counts the hit, in one transaction.
///
/// The key never exists without a TTL.
fn window_increment(key: &str) -> redis::Pipeline {
    let mut pipe = redis::pipe();
    pipe.atomic()
        .cmd("SET")
        .arg(key)
        .arg(0)
        .arg("EX")
        .arg(START_WINDOW_SECS)
        .arg("NX")
        .ignore()
        .cmd("INCR")
        .arg(key);
    pipe
}

/// A middleware that rate limits session creation per client IP.
///
/// Passes every request through when no Redis is configured; Redis failures
/// are logged and also let the request through.
///
/// # Arguments
///
/// * `state` - The application state.
/// * `req` - The incoming request.
/// * `next` - The next middleware in the chain.
pub async fn rate_limit_start(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(redis) = state.redis.as_ref() else {
        return next.run(req).await;
    };

    let ip = extract_real_ip(&req);
    let key = format!("rate_limit:verification_start:{}", ip);
    let mut conn = redis.clone();

    let counted: redis::RedisResult<(i64,)> = window_increment(&key).query_async(&mut conn).await;
    let count = match counted {
        Ok((count,)) => count,
        Err(e) => {
            tracing::warn!("⚠️  Rate limiter unavailable, allowing request: {}", e);
            return next.run(req).await;
        }
    };

    if count > i64::from(state.config.start_rate_limit_per_hour) {
        let ttl: Option<i64> = redis::cmd("TTL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .unwrap_or(None);

        return AppError::RateLimitExceeded(format!(
            "Too many verification attempts. Try again in {} minutes",
            ttl.unwrap_or(0).max(0) / 60
        ))
        .into_response();
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_is_created_with_expiry_before_counting() {
        let packed = window_increment("rate_limit:verification_start:10.0.0.1").get_packed_pipeline();
        let packed = String::from_utf8_lossy(&packed);

        let order: Vec<usize> = ["MULTI", "SET", "EX", "3600", "NX", "INCR", "EXEC"]
            .iter()
            .map(|token| packed.find(token).unwrap())
            .collect();
        assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "{}", packed);
        assert!(!packed.contains("EXPIRE"));
    }
}
