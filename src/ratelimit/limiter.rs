//! Core rate limiter implementation.

use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace};

use super::decision::Decision;
use super::identity::Identity;
use super::quota::{Quota, QuotaOverride};
use crate::store::{CounterStore, StoreError};

/// Errors returned by [`RateLimiter::check`].
///
/// No decision is produced when any of these occur.
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// The counter store failed or returned an unusable value
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Neither a token nor an IP was supplied
    #[error("Request carries neither a token nor a client IP")]
    MissingIdentity,
}

/// The rate limit engine.
///
/// It holds only its default quota; every counter and override lives in the
/// counter store, so a single instance can be shared across tasks without
/// locking.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    defaults: Quota,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a rate limiter over `store` with the given default quota.
    pub fn new(store: Arc<dyn CounterStore>, default_limit: u64, default_window_secs: u64) -> Self {
        Self {
            store,
            defaults: Quota::new(default_limit, default_window_secs),
        }
    }

    /// The quota used for identities without overrides.
    pub fn defaults(&self) -> Quota {
        self.defaults
    }

    /// Count one request for the identity derived from `ip` and `token` and
    /// decide whether it is admitted.
    ///
    /// The request is counted before the decision is made, so rejected
    /// requests use up quota too.
    pub async fn check(&self, ip: &str, token: &str) -> Result<Decision, RateLimitError> {
        let identity = Identity::resolve(ip, token).ok_or(RateLimitError::MissingIdentity)?;

        trace!(identity = %identity, "Checking rate limit");

        let quota = self.effective_quota(&identity).await?;
        let usage_key = identity.usage_key();

        let count = self
            .store
            .increment_with_expiry(&usage_key, quota.window_secs)
            .await?;
        let ttl = self.store.get_ttl_seconds(&usage_key).await?;

        let decision = Decision::from_usage(quota, count, ttl);

        debug!(
            identity = %identity,
            limit = quota.limit,
            window_secs = quota.window_secs,
            count = count,
            remaining = decision.remaining,
            ttl = decision.ttl_seconds,
            "Rate limit checked"
        );

        if !decision.allowed {
            debug!(identity = %identity, count = count, limit = quota.limit, "Rate limit exceeded");
        }

        Ok(decision)
    }

    /// Resolve the quota for `identity`: stored overrides first, defaults otherwise.
    pub async fn effective_quota(&self, identity: &Identity) -> Result<Quota, RateLimitError> {
        let limit_key = identity.limit_override_key();
        let window_key = identity.window_override_key();

        let (stored_limit, stored_window) =
            futures::try_join!(self.store.get(&limit_key), self.store.get(&window_key))?;

        let quota =
            self.defaults
                .with_stored_overrides(&limit_key, stored_limit, &window_key, stored_window)?;
        Ok(quota)
    }

    /// Store override values for `identity`; the override keys expire after
    /// `ttl_secs`, or never when it is `0`.
    pub async fn set_override(
        &self,
        identity: &Identity,
        quota: QuotaOverride,
        ttl_secs: u64,
    ) -> Result<(), RateLimitError> {
        if let Some(limit) = quota.limit {
            self.store
                .set_with_expiry(&identity.limit_override_key(), to_stored(limit), ttl_secs)
                .await?;
        }
        if let Some(window) = quota.window_secs {
            self.store
                .set_with_expiry(&identity.window_override_key(), to_stored(window), ttl_secs)
                .await?;
        }

        info!(
            identity = %identity,
            limit = ?quota.limit,
            window_secs = ?quota.window_secs,
            ttl_secs = ttl_secs,
            "Quota override stored"
        );
        Ok(())
    }
}

fn to_stored(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
