//! Registry of tenant limiters.
//!
//! The factory lazily creates one [`TenantLimiter`] per tenant, hands the
//! shared [`SystemLimiter`] to privileged traffic, propagates configuration
//! snapshots to every live limiter and evicts tenants that have gone idle.
//!
//! The registry is a sharded concurrent map; a shard lock is held only for
//! lookup, insertion or removal and never across a wait, so a tenant blocked
//! on its quota never slows down lookups for anyone else.

use std::sync::Arc;
use std::sync::Weak;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::Context;
use crate::error::Result;
use crate::limiter::Limiter;
use crate::limiter::TenantLimiter;
use crate::metrics::MetricsSink;
use crate::request::RequestInfo;
use crate::system::SystemLimiter;
use crate::tenant::TenantId;

pub struct LimiterFactory {
    /// Snapshot bound to newly created limiters
    config: ArcSwap<Config>,

    registry: DashMap<TenantId, Arc<TenantLimiter>>,

    system: Arc<SystemLimiter>,

    metrics: Arc<dyn MetricsSink>,

    /// Orders concurrent configuration updates
    update_lock: Mutex<()>,
}

impl LimiterFactory {
    /// Create a factory bound to an initial, validated snapshot
    pub fn new(config: Config, metrics: Arc<dyn MetricsSink>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config: ArcSwap::from_pointee(config),
            registry: DashMap::new(),
            system: Arc::new(SystemLimiter::new(Arc::clone(&metrics))),
            metrics,
            update_lock: Mutex::new(()),
        })
    }

    /// Resolve the limiter for `tenant`, creating it on first use
    ///
    /// Concurrent first calls for the same tenant all receive the same
    /// instance. The system tenant always gets the shared exempt limiter and
    /// never enters the registry.
    pub fn get_limiter(&self, tenant: TenantId) -> Result<Arc<dyn Limiter>> {
        if tenant.is_system() {
            return Ok(Arc::clone(&self.system) as Arc<dyn Limiter>);
        }
        Ok(self.tenant_limiter(tenant)? as Arc<dyn Limiter>)
    }

    fn tenant_limiter(&self, tenant: TenantId) -> Result<Arc<TenantLimiter>> {
        if let Some(limiter) = self.registry.get(&tenant) {
            return Ok(Arc::clone(&limiter));
        }

        // The snapshot is loaded under the shard lock, so a concurrent
        // update either sees this entry or was stored before the load
        match self.registry.entry(tenant) {
            Entry::Occupied(entry) => Ok(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let limiter = Arc::new(TenantLimiter::new(tenant, self.config.load_full(), Arc::clone(&self.metrics))?);
                entry.insert(Arc::clone(&limiter));
                tracing::debug!(%tenant, "created tenant limiter");
                Ok(limiter)
            }
        }
    }

    /// Admit one request for `tenant`
    ///
    /// The limiter stays referenced for the whole wait, which keeps it out of
    /// the eviction sweep until the call returns.
    pub async fn wait(&self, ctx: &Context, tenant: TenantId, info: &RequestInfo) -> Result<()> {
        let limiter = self.get_limiter(tenant)?;
        limiter.wait(ctx, info).await?;
        Ok(())
    }

    /// Replace the active snapshot and push it to every live limiter
    ///
    /// An invalid snapshot is rejected as a whole and the last good one
    /// stays in force.
    pub fn update_configuration(&self, config: Config) -> Result<()> {
        if let Err(err) = config.validate() {
            tracing::warn!(error = %err, "rejected tenant rate configuration, keeping last known good");
            return Err(err);
        }

        let _serial = self.update_lock.lock();
        let config = Arc::new(config);
        self.config.store(Arc::clone(&config));

        let mut updated = 0usize;
        for entry in self.registry.iter() {
            match entry.value().reconfigure(Arc::clone(&config)) {
                Ok(()) => updated += 1,
                Err(err) => tracing::error!(tenant = %entry.key(), error = %err, "failed to reconfigure tenant limiter"),
            }
        }

        tracing::info!(
            tenants = updated,
            requests_rate = config.requests.rate,
            requests_burst = config.requests.burst,
            idle_eviction_ms = config.idle_eviction.as_millis() as u64,
            "applied tenant rate configuration"
        );
        Ok(())
    }

    /// Remove limiters idle longer than the eviction window
    ///
    /// A limiter still referenced outside the registry (an in-flight wait or
    /// a caller holding it) is kept. Evicted tenants start over at full
    /// burst on their next request. Returns the number evicted.
    pub fn evict_idle(&self) -> usize {
        let window = self.config.load().idle_eviction;
        let now = Instant::now();
        let mut evicted = 0usize;

        self.registry.retain(|tenant, limiter| {
            if Arc::strong_count(limiter) > 1 || limiter.idle_for(now) < window {
                return true;
            }
            tracing::debug!(%tenant, "evicting idle tenant limiter");
            self.metrics.evicted(*tenant);
            evicted += 1;
            false
        });

        if evicted > 0 {
            tracing::info!(evicted, remaining = self.registry.len(), "tenant eviction sweep completed");
        }
        evicted
    }

    /// Run [`evict_idle`](Self::evict_idle) periodically in the background
    ///
    /// The interval is re-read from the active snapshot before each sweep.
    /// The task stops when the returned token is cancelled or the factory
    /// is dropped.
    pub fn spawn_eviction_sweep(self: &Arc<Self>) -> CancellationToken {
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let factory = Arc::downgrade(self);

        tokio::spawn(async move {
            run_eviction_loop(factory, cancel_clone).await;
        });

        cancel
    }

    /// Apply every snapshot published on `rx`, starting with the current one
    ///
    /// Invalid snapshots are logged and skipped. The task ends when the
    /// sender is dropped or the factory is gone.
    pub fn spawn_config_watcher(self: &Arc<Self>, mut rx: watch::Receiver<Config>) -> JoinHandle<()> {
        let factory = Arc::downgrade(self);

        tokio::spawn(async move {
            loop {
                let config = rx.borrow_and_update().clone();
                let Some(live) = factory.upgrade() else {
                    break;
                };
                // Rejections are already logged by update_configuration
                let _ = live.update_configuration(config);
                drop(live);

                if rx.changed().await.is_err() {
                    tracing::debug!("configuration source closed, stopping watcher");
                    break;
                }
            }
        })
    }

    pub fn current_config(&self) -> Arc<Config> {
        self.config.load_full()
    }

    /// Number of tenants with a live limiter (the system tenant is not counted)
    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    pub fn contains(&self, tenant: TenantId) -> bool {
        self.registry.contains_key(&tenant)
    }
}

async fn run_eviction_loop(factory: Weak<LimiterFactory>, cancel: CancellationToken) {
    tracing::info!("tenant eviction sweep started");

    loop {
        let Some(interval) = factory.upgrade().map(|live| live.current_config().sweep_interval) else {
            break;
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }

        match factory.upgrade() {
            Some(live) => {
                live.evict_idle();
            }
            None => break,
        }
    }

    tracing::info!("tenant eviction sweep stopped");
}

impl std::fmt::Debug for LimiterFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterFactory").field("config", &self.config.load_full()).field("tenants", &self.registry.len()).finish_non_exhaustive()
    }
}
