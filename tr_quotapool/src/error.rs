use std::fmt;

/// Result type for quota pool operations
pub type Result<T> = std::result::Result<T, QuotaError>;

/// Errors that can occur while acquiring or configuring quota
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuotaError {
    /// Not enough tokens for a non-blocking acquisition
    Exceeded,

    /// Caller cancelled while waiting for tokens
    Canceled,

    /// Caller deadline elapsed while waiting for tokens
    DeadlineExceeded,

    /// Invalid rate or burst
    InvalidConfig(&'static str),
}

impl fmt::Display for QuotaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuotaError::Exceeded => write!(f, "Quota exceeded"),
            QuotaError::Canceled => write!(f, "Quota acquisition canceled"),
            QuotaError::DeadlineExceeded => write!(f, "Deadline exceeded while waiting for quota"),
            QuotaError::InvalidConfig(msg) => write!(f, "Invalid quota pool configuration: {}", msg),
        }
    }
}

impl std::error::Error for QuotaError {}
