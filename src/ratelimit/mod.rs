//! Rate limiting decisions and identity handling.

mod decision;
mod identity;
mod limiter;
mod quota;

pub use decision::{Decision, REJECTION_MESSAGE};
pub use identity::Identity;
pub use limiter::{RateLimitError, RateLimiter};
pub use quota::{Quota, QuotaOverride};
