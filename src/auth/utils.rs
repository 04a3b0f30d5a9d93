use chrono::{DateTime, Duration, Utc};
use std::net::IpAddr;
use std::sync::Mutex;
use axum::http::HeaderMap;
use subtle::ConstantTimeEq;
use crate::models::ses::OriginContext;

/// Shared helpers for the auth modules: the clock collaborator, request
/// origin extraction and constant-time comparison.

// =============================================================================
// TIME UTILITIES
// =============================================================================

/// Wall-clock source consumed by the session and lockout logic
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Clock backed by the system time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self { now: Mutex::new(start) }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now = *now + by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// CRYPTOGRAPHIC UTILITIES
// =============================================================================

/// Compare two byte strings without an early exit on the first mismatch.
/// Length is not treated as secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.ct_eq(b).into()
}

// =============================================================================
// ORIGIN UTILITIES
// =============================================================================

/// Extract the client IP address from proxy headers
///
/// # Arguments
/// * `headers` - HTTP headers
///
/// # Returns
/// The first parseable address from X-Forwarded-For, X-Real-IP or
/// CF-Connecting-IP, in that order
pub fn extract_ip_from_headers(headers: &HeaderMap) -> Option<IpAddr> {
    // Take the first IP in the chain (original client)
    if let Some(first_ip) = headers
        .get("x-forwarded-for")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.split(',').next())
    {
        if let Ok(ip) = first_ip.trim().parse::<IpAddr>() {
            return Some(ip);
        }
    }

    ["x-real-ip", "cf-connecting-ip"].iter().find_map(|name| {
        headers
            .get(*name)
            .and_then(|h| h.to_str().ok())
            .and_then(|v| v.trim().parse::<IpAddr>().ok())
    })
}

/// Extract User-Agent from headers
pub fn extract_user_agent(headers: &HeaderMap) -> Option<String> {
    headers
        .get("user-agent")
        .and_then(|hv| hv.to_str().ok())
        .map(sanitize_for_logging)
}

/// Build the origin context for a request from its headers
pub fn origin_from_headers(headers: &HeaderMap) -> OriginContext {
    OriginContext::new(extract_ip_from_headers(headers), extract_user_agent(headers))
}

/// Extract a bearer token from the Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

// =============================================================================
// STRING UTILITIES
// =============================================================================

/// Strip control characters and cap length before a value reaches the logs
pub fn sanitize_for_logging(input: &str) -> String {
    input
        .chars()
        .filter(|c| !c.is_control())
        .take(256)
        .collect()
}
