use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tr_app::cli;
use tr_app::config_loader;
use tr_app::shutdown_handler;
use tr_app::sim;
use tr_app::tracing_setup;
use tr_tenantrate::Dimension;
use tr_tenantrate::LimiterFactory;
use tr_tenantrate::TenantId;
use tr_tenantrate::TenantMetrics;
use tracing::info;
use tracing::Level;

const APP_NAME: &str = "tenantrate_sim";
const LOG_DIR: &str = "./logs";
const DEFAULT_CONFIG: &str = "tr_app/config/tenantrate.toml";
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

// System traffic is offered at a multiple of tenant load; it is never throttled
const SYSTEM_LOAD_FACTOR: f64 = 4.0;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _guard = tracing_setup::init(APP_NAME, LOG_DIR, Level::INFO, Level::DEBUG, true);

    let config_path = cli::config_path(DEFAULT_CONFIG);
    let settings = config_loader::load_sim_config_or_default(&config_path);
    info!(
        tenants = settings.tenants,
        offered_rate = settings.offered_rate,
        requests_rate = settings.limits.requests.rate,
        requests_burst = settings.limits.requests.burst,
        "Starting {APP_NAME}"
    );

    let shutdown = CancellationToken::new();
    shutdown_handler::setup(shutdown.clone())?;

    let metrics = Arc::new(TenantMetrics::new());
    let factory = Arc::new(LimiterFactory::new(settings.limits.clone(), metrics.clone())?);
    let sweep = factory.spawn_eviction_sweep();

    let (config_tx, config_rx) = watch::channel(settings.limits.clone());
    let watcher = factory.spawn_config_watcher(config_rx);
    let reloader = tokio::spawn(sim::reload_loop(config_path, settings.reload_interval(), config_tx, shutdown.clone()));

    let mut workers = Vec::new();
    for id in 0..settings.tenants {
        // Tenant ids start past the reserved system id
        let tenant = TenantId::new(id + 2);
        workers.push(tokio::spawn(sim::drive_tenant(factory.clone(), tenant, settings.clone(), settings.offered_rate, shutdown.clone())));
    }
    workers.push(tokio::spawn(sim::drive_tenant(
        factory.clone(),
        TenantId::SYSTEM,
        settings.clone(),
        settings.offered_rate * SYSTEM_LOAD_FACTOR,
        shutdown.clone(),
    )));

    if settings.duration_secs > 0 {
        let shutdown = shutdown.clone();
        let run_for = Duration::from_secs(settings.duration_secs);
        tokio::spawn(async move {
            tokio::time::sleep(run_for).await;
            info!("Run duration of {run_for:?} elapsed");
            shutdown.cancel();
        });
    }

    let mut report = tokio::time::interval(REPORT_INTERVAL);
    report.set_missed_tick_behavior(MissedTickBehavior::Skip);
    report.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = report.tick() => log_metrics(&factory, &metrics),
        }
    }

    info!("Shutting down");
    sweep.cancel();
    let mut admitted = 0;
    for worker in workers {
        admitted += worker.await?;
    }
    info!(admitted, "Load generators stopped");
    reloader.await?;
    // The watcher exits once the reloader drops the sender
    watcher.await?;

    log_metrics(&factory, &metrics);
    Ok(())
}

fn log_metrics(factory: &LimiterFactory, metrics: &TenantMetrics) {
    let mut tenants = metrics.tenants();
    tenants.sort();

    for tenant in tenants {
        if let Some(snapshot) = metrics.snapshot(tenant) {
            info!(
                %tenant,
                admitted = snapshot.admitted,
                throttled = snapshot.throttled,
                requests_available = snapshot.available(Dimension::Requests),
                read_available = snapshot.available(Dimension::ReadBytes),
                write_available = snapshot.available(Dimension::WriteBytes),
                "Tenant admission"
            );
        }
    }
    info!(live_limiters = factory.len(), invariant_violations = metrics.invariant_violations(), "Admission summary");
}
