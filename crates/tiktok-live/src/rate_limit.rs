//! Recognition of rate-limit conditions in adapter error text.
//!
//! Neither TikTok nor the signing services in front of it return a stable error
//! code when throttling, so the adapter falls back to matching well-known markers.

/// Lower-case markers that identify a throttled request.
pub const RATE_LIMIT_INDICATORS: &[&str] = &[
    "rate_limit",
    "rate limit",
    "too many requests",
    "429",
    "sign server",
    "rate_limit_ip_day",
    "euler",
    "blocked",
];

/// Check whether an error message describes a rate-limit condition.
pub fn is_rate_limit_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    RATE_LIMIT_INDICATORS
        .iter()
        .any(|indicator| lower.contains(indicator))
}
