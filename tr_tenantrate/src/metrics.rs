use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::cost::Dimension;
use crate::tenant::TenantId;

/// Receiver of admission counters, pushed by limiters on the hot path
pub trait MetricsSink: Send + Sync {
    /// A request was admitted
    fn admitted(&self, tenant: TenantId);

    /// An admitted request had to wait for quota first
    fn throttled(&self, tenant: TenantId);

    /// Tokens left in one of the tenant's buckets after a debit
    fn available_tokens(&self, tenant: TenantId, dimension: Dimension, tokens: u64);

    /// A programming defect was absorbed on the admission path
    fn invariant_violation(&self, tenant: TenantId, what: &'static str);

    /// The tenant's limiter was evicted; per-tenant state can be released
    fn evicted(&self, _tenant: TenantId) {}
}

/// Discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn admitted(&self, _tenant: TenantId) {}

    fn throttled(&self, _tenant: TenantId) {}

    fn available_tokens(&self, _tenant: TenantId, _dimension: Dimension, _tokens: u64) {}

    fn invariant_violation(&self, _tenant: TenantId, _what: &'static str) {}
}

#[derive(Debug, Default)]
struct TenantCounters {
    admitted: AtomicU64,
    throttled: AtomicU64,
    available: [AtomicU64; Dimension::COUNT],
}

/// Point-in-time copy of one tenant's counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenantMetricsSnapshot {
    pub admitted: u64,
    pub throttled: u64,
    pub available_tokens: [u64; Dimension::COUNT],
}

impl TenantMetricsSnapshot {
    pub fn available(&self, dimension: Dimension) -> u64 {
        self.available_tokens[dimension.index()]
    }
}

/// In-process metrics registry keyed by tenant
///
/// Counters are monotonic while the tenant's limiter lives; gauges hold
/// the last value pushed. Eviction drops the tenant's entry, so memory
/// follows the live tenant set and a returning tenant counts from zero.
#[derive(Debug, Default)]
pub struct TenantMetrics {
    tenants: DashMap<TenantId, Arc<TenantCounters>>,
    invariant_violations: AtomicU64,
}

impl TenantMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    fn counters(&self, tenant: TenantId) -> Arc<TenantCounters> {
        if let Some(counters) = self.tenants.get(&tenant) {
            return Arc::clone(&counters);
        }
        Arc::clone(&self.tenants.entry(tenant).or_default())
    }

    pub fn snapshot(&self, tenant: TenantId) -> Option<TenantMetricsSnapshot> {
        let counters = self.tenants.get(&tenant)?;
        let mut snapshot = TenantMetricsSnapshot {
            admitted: counters.admitted.load(Ordering::Relaxed),
            throttled: counters.throttled.load(Ordering::Relaxed),
            ..TenantMetricsSnapshot::default()
        };
        for (slot, gauge) in snapshot.available_tokens.iter_mut().zip(counters.available.iter()) {
            *slot = gauge.load(Ordering::Relaxed);
        }
        Some(snapshot)
    }

    /// Tenants with at least one recorded event
    pub fn tenants(&self) -> Vec<TenantId> {
        self.tenants.iter().map(|entry| *entry.key()).collect()
    }

    pub fn invariant_violations(&self) -> u64 {
        self.invariant_violations.load(Ordering::Relaxed)
    }
}

impl MetricsSink for TenantMetrics {
    fn admitted(&self, tenant: TenantId) {
        self.counters(tenant).admitted.fetch_add(1, Ordering::Relaxed);
    }

    fn throttled(&self, tenant: TenantId) {
        self.counters(tenant).throttled.fetch_add(1, Ordering::Relaxed);
    }

    fn available_tokens(&self, tenant: TenantId, dimension: Dimension, tokens: u64) {
        self.counters(tenant).available[dimension.index()].store(tokens, Ordering::Relaxed);
    }

    fn invariant_violation(&self, tenant: TenantId, what: &'static str) {
        tracing::error!(%tenant, what, "admission invariant violated");
        self.invariant_violations.fetch_add(1, Ordering::Relaxed);
    }

    fn evicted(&self, tenant: TenantId) {
        self.tenants.remove(&tenant);
    }
}
