use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Result;
use crate::limiter::Limiter;
use crate::metrics::MetricsSink;
use crate::request::RequestInfo;
use crate::tenant::TenantId;

/// Limiter for cluster-internal traffic: never blocks, never debits
pub struct SystemLimiter {
    metrics: Arc<dyn MetricsSink>,
}

impl SystemLimiter {
    pub fn new(metrics: Arc<dyn MetricsSink>) -> Self {
        Self { metrics }
    }
}

impl Limiter for SystemLimiter {
    fn tenant(&self) -> TenantId {
        TenantId::SYSTEM
    }

    fn wait<'a>(&'a self, _ctx: &'a Context, _info: &'a RequestInfo) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        self.metrics.admitted(TenantId::SYSTEM);
        Box::pin(std::future::ready(Ok(())))
    }
}

impl std::fmt::Debug for SystemLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemLimiter").finish_non_exhaustive()
    }
}
