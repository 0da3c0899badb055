//! Load generation and limit reloading for the simulator binary

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tr_tenantrate::Config;
use tr_tenantrate::Context;
use tr_tenantrate::LimiterFactory;
use tr_tenantrate::RequestInfo;
use tr_tenantrate::TenantId;
use tr_tenantrate::TenantRateError;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::config_loader;
use crate::config_loader::SimConfigFile;

const MIN_OFFERED_RATE: f64 = 0.001;
const MIN_OFFER_PERIOD: Duration = Duration::from_micros(1);

/// Gap between offered requests, never zero so the ticker cannot panic
pub fn offer_period(offered_rate: f64) -> Duration {
    // f64::max ignores NaN
    let rate = offered_rate.max(MIN_OFFERED_RATE);
    Duration::try_from_secs_f64(1.0 / rate).unwrap_or(MIN_OFFER_PERIOD).max(MIN_OFFER_PERIOD)
}

/// Request shape every simulated tenant issues
pub fn request_for(sim: &SimConfigFile) -> RequestInfo {
    if sim.write_bytes > 0 {
        RequestInfo::new(1, sim.read_bytes, 1, sim.write_bytes)
    } else {
        RequestInfo::read(1, sim.read_bytes)
    }
}

/// Issue requests for one tenant at the offered rate until shutdown
///
/// Returns the number of admitted requests.
pub async fn drive_tenant(
    factory: Arc<LimiterFactory>,
    tenant: TenantId,
    sim: SimConfigFile,
    offered_rate: f64,
    shutdown: CancellationToken,
) -> u64 {
    let mut ticker = tokio::time::interval(offer_period(offered_rate));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let info = request_for(&sim);
    let mut admitted = 0;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let ctx = Context::with_timeout(sim.request_timeout()).with_cancel(shutdown.child_token());
        match factory.wait(&ctx, tenant, &info).await {
            Ok(()) => admitted += 1,
            Err(TenantRateError::DeadlineExceeded) => debug!(%tenant, "Admission deadline exceeded"),
            Err(TenantRateError::Canceled) => break,
            Err(err) => {
                warn!(%tenant, "Admission failed: {err}");
                break;
            }
        }
    }

    admitted
}

/// Re-read the limits file every `interval` and publish changes on `tx`
///
/// Unreadable or invalid files are logged and the last published limits
/// stay in force.
pub async fn reload_loop(path: String, interval: Duration, tx: watch::Sender<Config>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }

        match config_loader::load_limits(&path) {
            Ok(limits) => {
                let changed = tx.send_if_modified(|current| {
                    if *current == limits {
                        return false;
                    }
                    *current = limits;
                    true
                });
                if changed {
                    info!("Admission limits changed in {path}, publishing");
                }
            }
            Err(err) => warn!("Ignoring unreadable limits in {path}: {err}"),
        }
    }
}
