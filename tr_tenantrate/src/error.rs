use thiserror::Error;
use tr_quotapool::QuotaError;

/// Result type for admission control operations
pub type Result<T> = std::result::Result<T, TenantRateError>;

/// Errors surfaced by the admission gate
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenantRateError {
    /// The caller's deadline elapsed while waiting for quota
    #[error("deadline exceeded while waiting for admission")]
    DeadlineExceeded,

    /// The caller cancelled while waiting for quota
    #[error("admission canceled")]
    Canceled,

    /// A configuration snapshot was rejected
    #[error("invalid tenant rate configuration: {0}")]
    ConfigurationInvalid(String),

    /// Any other quota pool failure
    #[error("quota pool error: {0}")]
    Quota(QuotaError),
}

impl From<QuotaError> for TenantRateError {
    fn from(err: QuotaError) -> Self {
        match err {
            QuotaError::DeadlineExceeded => TenantRateError::DeadlineExceeded,
            QuotaError::Canceled => TenantRateError::Canceled,
            QuotaError::InvalidConfig(msg) => TenantRateError::ConfigurationInvalid(msg.to_string()),
            other => TenantRateError::Quota(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_quota_error() {
        assert_eq!(TenantRateError::from(QuotaError::DeadlineExceeded), TenantRateError::DeadlineExceeded);
        assert_eq!(TenantRateError::from(QuotaError::Canceled), TenantRateError::Canceled);
        assert_eq!(
            TenantRateError::from(QuotaError::InvalidConfig("burst must be greater than 0")),
            TenantRateError::ConfigurationInvalid("burst must be greater than 0".to_string())
        );
        assert_eq!(TenantRateError::from(QuotaError::Exceeded), TenantRateError::Quota(QuotaError::Exceeded));
    }
}
