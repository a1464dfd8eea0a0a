//! Token-bucket rate limiting for per-session packet budgets.
mod token_bucket;

pub use token_bucket::{PacketBudget, TimeProvider, TokenBucket, Verdict};

const LOG_TARGET: &str = "rate-limiter";
