//! # tr_quotapool
//!
//! Blocking, concurrency-safe token bucket used as the quota pool behind
//! every throttled dimension of a tenant limiter.

pub mod error;
pub mod pool;
mod time;

pub use error::QuotaError;
pub use error::Result;
pub use pool::Acquired;
pub use pool::MAX_BURST;
pub use pool::QuotaPool;
pub use pool::QuotaPoolBuilder;
