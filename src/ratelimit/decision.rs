//! Admission decisions.

use super::quota::Quota;

/// Message returned to clients that have used up their quota.
pub const REJECTION_MESSAGE: &str =
    "you have reached the maximum number of requests or actions allowed within a certain time frame";

/// The verdict for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The effective limit the request was checked against
    pub limit: u64,
    /// Requests left in the current window, `0` when rejected
    pub remaining: u64,
    /// Seconds until the current window resets
    pub ttl_seconds: u64,
    /// Set only for rejected requests
    pub message: String,
}

impl Decision {
    /// Build the decision for a request that was counted as number `count`
    /// in a window with `ttl_seconds` left.
    pub fn from_usage(quota: Quota, count: i64, ttl_seconds: i64) -> Self {
        let limit = i64::try_from(quota.limit).unwrap_or(i64::MAX);
        let remaining = limit.saturating_sub(count);
        let ttl_seconds = u64::try_from(ttl_seconds).unwrap_or(0);

        if remaining < 0 {
            Self {
                allowed: false,
                limit: quota.limit,
                remaining: 0,
                ttl_seconds,
                message: REJECTION_MESSAGE.to_string(),
            }
        } else {
            Self {
                allowed: true,
                limit: quota.limit,
                remaining: remaining as u64,
                ttl_seconds,
                message: String::new(),
            }
        }
    }
}
