//! # tr_tenantrate
//!
//! Per-tenant admission control in front of shared storage.
//!
//! Every storage operation calls [`LimiterFactory::wait`] (or resolves a
//! [`Limiter`] once via [`LimiterFactory::get_limiter`]) before touching the
//! cluster. Each tenant owns one token bucket per [`Dimension`]; the request's
//! [`RequestInfo`] is turned into a [`CostVector`] and debited dimension by
//! dimension, blocking until quota is available or the caller's [`Context`]
//! expires. The reserved [`TenantId::SYSTEM`] is never throttled.
//!
//! Configuration is an immutable [`Config`] snapshot swapped atomically on
//! each change; idle tenants are evicted by a background sweep.

pub mod config;
pub mod context;
pub mod cost;
pub mod error;
pub mod factory;
pub mod limiter;
pub mod metrics;
pub mod request;
pub mod system;
pub mod tenant;

pub use config::Config;
pub use config::DimensionConfig;
pub use context::Context;
pub use cost::CostVector;
pub use cost::Dimension;
pub use cost::cost;
pub use error::Result;
pub use error::TenantRateError;
pub use factory::LimiterFactory;
pub use limiter::Limiter;
pub use limiter::TenantLimiter;
pub use metrics::MetricsSink;
pub use metrics::NoopMetrics;
pub use metrics::TenantMetrics;
pub use metrics::TenantMetricsSnapshot;
pub use request::RequestInfo;
pub use system::SystemLimiter;
pub use tenant::TenantId;
