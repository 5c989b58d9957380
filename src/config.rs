use std::{fmt, sync::Arc, time::Duration};

use crate::{bucket::RefillEvent, Error, Result};

pub(crate) const DEFAULT_THREAD_NAME: &str = "token-bucket-refiller";

pub(crate) type RefillCallback = Arc<dyn Fn(RefillEvent) + Send + Sync + 'static>;

/// What a refill event does to the token count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefillMode {
    /// Set the count back to capacity. Unused tokens never accumulate.
    #[default]
    Reset,
    /// Add this many tokens, never going over capacity.
    Add(u32),
}

impl RefillMode {
    /// The count after one refill, given the count before it.
    pub(crate) fn apply(self, count: u32, capacity: u32) -> u32 {
        match self {
            RefillMode::Reset => capacity,
            RefillMode::Add(amount) => count.saturating_add(amount).min(capacity),
        }
    }
}

/// Everything needed to build a [`TokenBucket`](crate::TokenBucket).
///
/// ```
/// use std::time::Duration;
/// use refill::{BucketConfig, RefillMode, TokenBucket};
///
/// let bucket = TokenBucket::with_config(
///     BucketConfig::new(10, Duration::from_secs(1))
///         .refill_mode(RefillMode::Add(2))
///         .thread_name("api-refiller"),
/// )
/// .unwrap();
/// assert!(bucket.request());
/// ```
#[derive(Clone)]
pub struct BucketConfig {
    pub(crate) capacity: u32,
    pub(crate) refill_period: Duration,
    pub(crate) refill_mode: RefillMode,
    pub(crate) thread_name: String,
    pub(crate) on_refill: Option<RefillCallback>,
}

impl BucketConfig {
    /// Create a config with the given capacity and refill period.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum number of tokens, and the number the bucket starts with.
    /// * `refill_period` - How often the refiller runs.
    pub fn new(capacity: u32, refill_period: Duration) -> Self {
        Self {
            capacity,
            refill_period,
            refill_mode: RefillMode::default(),
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            on_refill: None,
        }
    }

    pub fn refill_mode(mut self, mode: RefillMode) -> Self {
        self.refill_mode = mode;
        self
    }

    /// Name given to the background refiller thread.
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Register a callback run on the refiller thread after every refill.
    ///
    /// The bucket lock is not held while it runs, so it may call back into the bucket.
    /// It should return quickly: the next refill waits for it.
    pub fn on_refill<F>(mut self, callback: F) -> Self
    where
        F: Fn(RefillEvent) + Send + Sync + 'static,
    {
        self.on_refill = Some(Arc::new(callback));
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::ZeroCapacity);
        }
        if self.refill_period.is_zero() {
            return Err(Error::ZeroRefillPeriod);
        }
        if self.refill_mode == RefillMode::Add(0) {
            return Err(Error::ZeroRefillAmount);
        }
        Ok(())
    }
}

impl fmt::Debug for BucketConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketConfig")
            .field("capacity", &self.capacity)
            .field("refill_period", &self.refill_period)
            .field("refill_mode", &self.refill_mode)
            .field("thread_name", &self.thread_name)
            .field("on_refill", &self.on_refill.is_some())
            .finish()
    }
}

static_assert_send!(BucketConfig);
static_assert_sync!(BucketConfig);
