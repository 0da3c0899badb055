use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tr_quotapool::QuotaPool;

use crate::config::Config;
use crate::context::Context;
use crate::cost::Dimension;
use crate::cost::cost;
use crate::error::Result;
use crate::error::TenantRateError;
use crate::metrics::MetricsSink;
use crate::request::RequestInfo;
use crate::tenant::TenantId;

/// Capability to wait for a tenant's admission
///
/// Callers hold this trait object and never the concrete variant: a
/// [`TenantLimiter`] for ordinary tenants or the
/// [`SystemLimiter`](crate::SystemLimiter) for privileged traffic.
pub trait Limiter: Send + Sync {
    /// Tenant this limiter admits requests for
    fn tenant(&self) -> TenantId;

    /// Block until `info` may proceed, or until `ctx` is cancelled or expires
    fn wait<'a>(&'a self, ctx: &'a Context, info: &'a RequestInfo) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;
}

/// Token bucket limiter for one tenant, one quota pool per dimension
///
/// Debits are independent per dimension and not refunded: when a later
/// dimension gives up on the caller's deadline, tokens already taken from
/// earlier dimensions stay spent.
pub struct TenantLimiter {
    tenant: TenantId,

    /// Indexed by `Dimension::index`
    pools: [QuotaPool; Dimension::COUNT],

    /// Snapshot used to price requests
    config: ArcSwap<Config>,

    /// Serialises reconfigurations so pools never mix two snapshots
    reconfigure_lock: Mutex<()>,

    /// Creation time, the reference point of `last_access`
    epoch: Instant,

    /// Nanoseconds after `epoch` of the last successful admission
    last_access: AtomicU64,

    metrics: Arc<dyn MetricsSink>,
}

impl TenantLimiter {
    /// Create a limiter with every bucket full
    pub fn new(tenant: TenantId, config: Arc<Config>, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        let pool = |dimension: Dimension| {
            let cfg = config.dimension(dimension);
            QuotaPool::new(cfg.rate, cfg.burst)
        };
        let pools = [pool(Dimension::Requests)?, pool(Dimension::ReadBytes)?, pool(Dimension::WriteBytes)?];

        Ok(Self {
            tenant,
            pools,
            config: ArcSwap::new(config),
            reconfigure_lock: Mutex::new(()),
            epoch: Instant::now(),
            last_access: AtomicU64::new(0),
            metrics,
        })
    }

    /// Bind a new snapshot and push its rate and burst into every pool
    ///
    /// Safe to call while other tasks are blocked in [`Limiter::wait`];
    /// they pick up the new rate from their next refill computation. The
    /// snapshot is published before the pools change, so a wait starting
    /// in between is priced with the new divisors. Callers pass validated
    /// snapshots; a pool rejecting one leaves earlier dimensions updated.
    pub fn reconfigure(&self, config: Arc<Config>) -> Result<()> {
        let _serial = self.reconfigure_lock.lock();
        self.config.store(Arc::clone(&config));

        for dimension in Dimension::ALL {
            let cfg = config.dimension(dimension);
            self.pools[dimension.index()].reconfigure(cfg.rate, cfg.burst)?;
        }
        Ok(())
    }

    pub fn config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Whole tokens left in a dimension's bucket
    pub fn available(&self, dimension: Dimension) -> u64 {
        self.pools[dimension.index()].available()
    }

    /// Time since the last successful admission (or creation)
    pub fn idle_for(&self, now: Instant) -> Duration {
        let last = self.epoch + Duration::from_nanos(self.last_access.load(Ordering::Relaxed));
        now.saturating_duration_since(last)
    }

    fn touch(&self) {
        let nanos = u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX);
        self.last_access.fetch_max(nanos, Ordering::Relaxed);
    }

    async fn wait_inner(&self, ctx: &Context, info: &RequestInfo) -> Result<()> {
        let config = self.config.load_full();
        let cost = cost(info, &config);
        if cost.is_clamped() {
            self.metrics.invariant_violation(self.tenant, "zero cost divisor");
        }

        let mut throttled = false;
        for (dimension, amount) in cost.iter() {
            let pool = &self.pools[dimension.index()];
            let acquired = pool.acquire(amount, ctx.cancel_token(), ctx.deadline()).await.map_err(|err| {
                tracing::debug!(tenant = %self.tenant, dimension = dimension.as_str(), amount, error = %err, "admission abandoned");
                TenantRateError::from(err)
            })?;

            throttled |= acquired.waited;
            self.metrics.available_tokens(self.tenant, dimension, pool.available());
        }

        self.touch();
        if throttled {
            self.metrics.throttled(self.tenant);
        }
        self.metrics.admitted(self.tenant);
        Ok(())
    }
}

impl Limiter for TenantLimiter {
    fn tenant(&self) -> TenantId {
        self.tenant
    }

    fn wait<'a>(&'a self, ctx: &'a Context, info: &'a RequestInfo) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(self.wait_inner(ctx, info))
    }
}

impl std::fmt::Debug for TenantLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantLimiter")
            .field("tenant", &self.tenant)
            .field("pools", &self.pools)
            .field("config", &self.config.load_full())
            .field("last_access", &self.last_access.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
