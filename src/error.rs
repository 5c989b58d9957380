use std::io;

/// Errors returned while building a [`TokenBucket`](crate::TokenBucket).
///
/// Once a bucket exists nothing it does can fail: `request` answers with a plain `bool`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("token bucket capacity must be at least 1")]
    ZeroCapacity,
    #[error("token bucket refill period must be greater than zero")]
    ZeroRefillPeriod,
    #[error("token bucket refill amount must be at least 1")]
    ZeroRefillAmount,
    #[error("failed to spawn refiller thread: {0}")]
    Spawn(#[from] io::Error),
}

impl Error {
    /// Whether the error was caused by a bad construction parameter, as opposed to the OS.
    pub fn is_invalid_argument(&self) -> bool {
        matches!(
            self,
            Error::ZeroCapacity | Error::ZeroRefillPeriod | Error::ZeroRefillAmount
        )
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
