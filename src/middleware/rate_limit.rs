//! Per-IP token-bucket rate limiting via `governor`, replacing the teacher's
//! stubbed always-allow placeholder with a real limiter keyed by client IP.

use std::net::IpAddr;
use std::num::NonZeroU32;

use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::Response,
};
use governor::{clock::DefaultClock, state::keyed::DashMapStateStore, Quota, RateLimiter};
use tracing::warn;

use crate::AppState;

pub type IpRateLimiter = RateLimiter<IpAddr, DashMapStateStore<IpAddr>, DefaultClock>;

pub fn build_limiter(requests_per_minute: u32, burst: u32) -> IpRateLimiter {
    let per_minute = NonZeroU32::new(requests_per_minute.max(1)).unwrap();
    let burst = NonZeroU32::new(burst.max(1)).unwrap();
    RateLimiter::keyed(Quota::per_minute(per_minute).allow_burst(burst))
}

pub async fn rate_limit_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let client_ip = extract_client_ip(request.headers());

    if state.limiter.check_key(&client_ip).is_err() {
        warn!(client_ip = %client_ip, "rate limit exceeded");
        state.metrics.increment_rate_limited();
        return Err(StatusCode::TOO_MANY_REQUESTS);
    }

    Ok(next.run(request).await)
}

fn extract_client_ip(headers: &HeaderMap) -> IpAddr {
    if let Some(forwarded_for) = headers.get("x-forwarded-for") {
        if let Ok(forwarded_str) = forwarded_for.to_str() {
            if let Some(first_ip) = forwarded_str.split(',').next() {
                if let Ok(ip) = first_ip.trim().parse() {
                    return ip;
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            if let Ok(ip) = ip_str.parse() {
                return ip;
            }
        }
    }

    IpAddr::from([0, 0, 0, 0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_is_allowed_then_exhausted() {
        let limiter = build_limiter(60, 2);
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_ok());
        assert!(limiter.check_key(&ip).is_err());
    }

    #[test]
    fn different_ips_have_independent_buckets() {
        let limiter = build_limiter(60, 1);
        let a: IpAddr = "127.0.0.1".parse().unwrap();
        let b: IpAddr = "127.0.0.2".parse().unwrap();
        assert!(limiter.check_key(&a).is_ok());
        assert!(limiter.check_key(&b).is_ok());
    }
}
