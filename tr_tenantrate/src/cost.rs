use std::ops::Index;

use crate::config::Config;
use crate::request::RequestInfo;

/// One independently throttled resource axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    /// Number of requests, at least one per admission
    Requests,
    /// Bytes read, in units of the dimension's divisor
    ReadBytes,
    /// Bytes written, in units of the dimension's divisor
    WriteBytes,
}

impl Dimension {
    pub const COUNT: usize = 3;

    /// Acquisition order used by every limiter
    pub const ALL: [Dimension; Dimension::COUNT] = [Dimension::Requests, Dimension::ReadBytes, Dimension::WriteBytes];

    /// Returns a static string label for metrics
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requests => "requests",
            Self::ReadBytes => "read_bytes",
            Self::WriteBytes => "write_bytes",
        }
    }

    #[inline(always)]
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Per-dimension cost of one request, ordered as [`Dimension::ALL`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CostVector {
    costs: [u64; Dimension::COUNT],
    clamped: bool,
}

impl CostVector {
    pub fn get(&self, dimension: Dimension) -> u64 {
        self.costs[dimension.index()]
    }

    /// `(dimension, cost)` pairs in acquisition order
    pub fn iter(&self) -> impl Iterator<Item = (Dimension, u64)> + '_ {
        Dimension::ALL.into_iter().map(move |dimension| (dimension, self.get(dimension)))
    }

    /// True when a zero divisor forced a dimension's cost to zero
    pub fn is_clamped(&self) -> bool {
        self.clamped
    }
}

impl Index<Dimension> for CostVector {
    type Output = u64;

    fn index(&self, dimension: Dimension) -> &u64 {
        &self.costs[dimension.index()]
    }
}

/// `ceil(amount / divisor)`; `None` for a zero divisor
#[inline]
fn div_ceil(amount: u64, divisor: u64) -> Option<u64> {
    if divisor == 0 {
        return None;
    }
    Some(amount / divisor + u64::from(amount % divisor != 0))
}

/// Derive the cost of `info` under `config`
///
/// Every request costs at least one unit of [`Dimension::Requests`]. Byte
/// dimensions cost `ceil(bytes / divisor)` and are zero only for zero bytes.
/// A zero divisor can only come from an unvalidated snapshot; the affected
/// dimension is clamped to zero and the vector is marked so the caller can
/// report the violation.
pub fn cost(info: &RequestInfo, config: &Config) -> CostVector {
    let mut clamped = false;
    let mut scaled = |amount: u64, divisor: u64| match div_ceil(amount, divisor) {
        Some(cost) => cost,
        None => {
            clamped = true;
            0
        }
    };

    let requests = scaled(info.operations(), config.requests.divisor).max(1);
    let read_bytes = scaled(info.read_bytes, config.read_bytes.divisor);
    let write_bytes = scaled(info.write_bytes, config.write_bytes.divisor);

    if clamped {
        tracing::error!(?info, "cost divisor is zero; clamping cost to zero");
    }

    CostVector { costs: [requests, read_bytes, write_bytes], clamped }
}
