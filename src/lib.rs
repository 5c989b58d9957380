//! A token bucket rate limiter with a background refiller.
//!
//! ```
//! use std::time::Duration;
//! use refill::TokenBucket;
//!
//! // 3 tokens, put back once a minute
//! let bucket = TokenBucket::new(3, Duration::from_secs(60)).unwrap();
//!
//! assert!(bucket.request());
//! assert!(bucket.request());
//! assert!(bucket.request());
//! assert!(!bucket.request());
//! ```

pub(crate) const fn assert_sync<T: ?Sized + Sync>() {}
macro_rules! static_assert_sync {
    ($T:ty) => {
        const _: () = {
            let _ = $crate::assert_sync::<$T>;
        };
    };
}

pub(crate) const fn assert_send<T: ?Sized + Send>() {}
macro_rules! static_assert_send {
    ($T:ty) => {
        const _: () = {
            let _ = $crate::assert_send::<$T>;
        };
    };
}

mod bucket;
mod config;
mod error;
mod refiller;

pub use bucket::{RefillEvent, TokenBucket};
pub use config::{BucketConfig, RefillMode};
pub use error::{Error, Result};
