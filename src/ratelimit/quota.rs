//! Quota configuration and override resolution.

use crate::store::{StoreError, StoreResult};

/// The effective quota for an identity: `limit` requests per `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quota {
    /// Maximum requests admitted in one window
    pub limit: u64,
    /// Window length in seconds
    pub window_secs: u64,
}

impl Quota {
    /// Create a new quota.
    pub fn new(limit: u64, window_secs: u64) -> Self {
        Self { limit, window_secs }
    }

    /// Apply stored override values on top of this quota.
    ///
    /// Each field is overridden on its own; a stored `0` leaves the field
    /// untouched, a negative value is rejected.
    pub fn with_stored_overrides(
        self,
        limit_key: &str,
        stored_limit: i64,
        window_key: &str,
        stored_window: i64,
    ) -> StoreResult<Self> {
        Ok(Self {
            limit: override_or(limit_key, stored_limit, self.limit)?,
            window_secs: override_or(window_key, stored_window, self.window_secs)?,
        })
    }
}

fn override_or(key: &str, stored: i64, default: u64) -> StoreResult<u64> {
    match stored {
        0 => Ok(default),
        v if v > 0 => Ok(v as u64),
        v => Err(StoreError::MalformedValue {
            key: key.to_string(),
            value: v.to_string(),
        }),
    }
}

/// Per-identity override values to write to the store.
///
/// `None` fields are left as they are.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaOverride {
    pub limit: Option<u64>,
    pub window_secs: Option<u64>,
}

impl QuotaOverride {
    /// Whether this override would change nothing.
    pub fn is_empty(&self) -> bool {
        self.limit.is_none() && self.window_secs.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_means_default() {
        let quota = Quota::new(10, 60)
            .with_stored_overrides("l", 0, "w", 0)
            .unwrap();
        assert_eq!(quota, Quota::new(10, 60));
    }

    #[test]
    fn test_fields_override_independently() {
        let quota = Quota::new(2, 2)
            .with_stored_overrides("l", 3, "w", 0)
            .unwrap();
        assert_eq!(quota, Quota::new(3, 2));

        let quota = Quota::new(2, 2)
            .with_stored_overrides("l", 0, "w", 5)
            .unwrap();
        assert_eq!(quota, Quota::new(2, 5));
    }

    #[test]
    fn test_negative_override_rejected() {
        let result = Quota::new(2, 2).with_stored_overrides("config:ip:x:limit", -1, "w", 0);

        match result {
            Err(StoreError::MalformedValue { key, value }) => {
                assert_eq!(key, "config:ip:x:limit");
                assert_eq!(value, "-1");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_override_is_empty() {
        assert!(QuotaOverride::default().is_empty());
        assert!(!QuotaOverride {
            limit: Some(3),
            window_secs: None
        }
        .is_empty());
    }
}
