use std::{
    fmt,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle, ThreadId},
    time::Duration,
};

use tracing::{debug, warn};

use crate::{config::RefillMode, refiller, BucketConfig, Result};

/// Passed to the [`on_refill`](BucketConfig::on_refill) callback after every refill.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefillEvent {
    /// Tokens left in the bucket just before the refill
    pub previous: u32,
    /// Tokens in the bucket right after the refill
    pub current: u32,
    pub capacity: u32,
    /// 1 for the first refill, 2 for the second, and so on
    pub sequence: u64,
}

/// Everything the request path and the refiller thread have to agree on.
pub(crate) struct Shared {
    state: Mutex<State>,
    pub(crate) wake: Condvar,
    pub(crate) capacity: u32,
    pub(crate) refill_period: Duration,
    pub(crate) refill_mode: RefillMode,
}

pub(crate) struct State {
    // How many tokens are currently in the bucket
    pub(crate) tokens: u32,
    // Set once, by teardown
    pub(crate) shutdown: bool,
    // How many refills have happened so far
    pub(crate) refills: u64,
}

impl Shared {
    fn new(config: &BucketConfig) -> Self {
        Self {
            state: Mutex::new(State {
                // Start the bucket full
                tokens: config.capacity,
                shutdown: false,
                refills: 0,
            }),
            wake: Condvar::new(),
            capacity: config.capacity,
            refill_period: config.refill_period,
            refill_mode: config.refill_mode,
        }
    }

    /// Nothing panics while holding the lock, so a poisoned state is still consistent.
    pub(crate) fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn request(&self) -> bool {
        let mut state = self.lock();
        if state.shutdown {
            return false;
        }

        if state.tokens > 0 {
            // Allow the request
            state.tokens -= 1;
            true
        } else {
            // Fail the request
            false
        }
    }

    /// Apply one refill to an already locked state.
    pub(crate) fn refill_locked(&self, state: &mut State) -> RefillEvent {
        let previous = state.tokens;
        state.tokens = self.refill_mode.apply(previous, self.capacity);
        state.refills += 1;
        RefillEvent {
            previous,
            current: state.tokens,
            capacity: self.capacity,
            sequence: state.refills,
        }
    }
}

/// A token bucket whose tokens are put back by a background thread.
///
/// The bucket starts full. Every [`request`](TokenBucket::request) takes one token if there is one,
/// and every refill period a dedicated thread resets the count back to capacity
/// (or tops it up, see [`RefillMode`]).
///
/// The bucket is `Send + Sync`; share it between threads with an `Arc`.
/// Dropping it, or calling [`shutdown`](TokenBucket::shutdown), stops the refiller and waits
/// for it.
pub struct TokenBucket {
    shared: Arc<Shared>,
    refiller: Mutex<Option<JoinHandle<()>>>,
    refiller_thread: ThreadId,
}

impl TokenBucket {
    /// Create a new TokenBucket with the given capacity and refill period.
    ///
    /// # Arguments
    ///
    /// * `capacity` - The maximum number of tokens. The bucket starts with this many.
    /// * `refill_period` - How often the bucket is refilled.
    ///
    /// # Returns
    ///
    ///    A running TokenBucket, or an error if either argument is zero or the refiller thread
    ///    could not be started.
    pub fn new(capacity: u32, refill_period: Duration) -> Result<Self> {
        Self::with_config(BucketConfig::new(capacity, refill_period))
    }

    pub fn with_config(config: BucketConfig) -> Result<Self> {
        config.validate()?;

        let shared = Arc::new(Shared::new(&config));
        let handle = refiller::spawn(shared.clone(), config.thread_name, config.on_refill)?;
        debug!(
            capacity = config.capacity,
            refill_period = ?config.refill_period,
            refill_mode = ?config.refill_mode,
            "token bucket created"
        );

        Ok(Self {
            shared,
            refiller_thread: handle.thread().id(),
            refiller: Mutex::new(Some(handle)),
        })
    }

    /// Try to take a token.
    ///
    /// Never waits for a refill: an empty bucket answers straight away.
    ///
    /// # Returns
    ///
    /// * `true` if the request is allowed
    /// * `false` if the request is not allowed, or the bucket has been shut down
    pub fn request(&self) -> bool {
        self.shared.request()
    }

    /// Tokens currently in the bucket.
    pub fn available(&self) -> u32 {
        self.shared.lock().tokens
    }

    pub fn capacity(&self) -> u32 {
        self.shared.capacity
    }

    pub fn refill_period(&self) -> Duration {
        self.shared.refill_period
    }

    pub fn refill_mode(&self) -> RefillMode {
        self.shared.refill_mode
    }

    /// Number of refills performed since the bucket was created.
    pub fn refills(&self) -> u64 {
        self.shared.lock().refills
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.lock().shutdown
    }

    /// Stop the refiller and wait for its thread to exit.
    ///
    /// Once this returns, the token count is never written again and every `request` returns
    /// `false`.
    /// Calling it more than once is fine. When called from inside an `on_refill` callback it only
    /// flags the refiller to stop, since the thread can't wait for itself.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.lock();
            if !state.shutdown {
                debug!("token bucket shutting down");
            }
            state.shutdown = true;
        }
        self.shared.wake.notify_one();

        if thread::current().id() == self.refiller_thread {
            return;
        }

        // Held across the join so a second caller can't return while the refiller still runs
        let mut refiller = self.refiller.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = refiller.take() {
            if handle.join().is_err() {
                warn!("token bucket refiller panicked");
            }
        }
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.lock();
        f.debug_struct("TokenBucket")
            .field("capacity", &self.shared.capacity)
            .field("refill_period", &self.shared.refill_period)
            .field("refill_mode", &self.shared.refill_mode)
            .field("available", &state.tokens)
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

static_assert_send!(TokenBucket);
static_assert_sync!(TokenBucket);

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc,
        time::{Duration, Instant},
    };

    use proptest::prelude::*;

    use super::*;

    const LONG: Duration = Duration::from_secs(3600);

    #[test]
    fn test_starts_full() {
        let bucket = TokenBucket::new(3, LONG).unwrap();
        assert_eq!(bucket.available(), 3);
        assert_eq!(bucket.capacity(), 3);
        assert_eq!(bucket.refill_period(), LONG);
        assert_eq!(bucket.refill_mode(), RefillMode::Reset);
        assert_eq!(bucket.refills(), 0);
        assert!(!bucket.is_shut_down());
    }

    #[test]
    fn test_request_drains_bucket() {
        let bucket = TokenBucket::new(10, LONG).unwrap();

        // Test that we can make 10 requests in a row
        for _ in 0..10 {
            assert!(bucket.request());
        }

        // Test that we can't make an 11th request, and that failing doesn't change anything
        assert!(!bucket.request());
        assert!(!bucket.request());
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(TokenBucket::new(0, LONG).unwrap_err().is_invalid_argument());
        assert!(TokenBucket::new(1, Duration::ZERO)
            .unwrap_err()
            .is_invalid_argument());
    }

    #[test]
    fn test_debug_shows_state() {
        let bucket = TokenBucket::new(4, LONG).unwrap();
        assert!(bucket.request());

        let debug = format!("{bucket:?}");
        assert!(debug.contains("capacity: 4"));
        assert!(debug.contains("available: 3"));
        assert!(debug.contains("shutdown: false"));

        bucket.shutdown();
        assert!(format!("{bucket:?}").contains("shutdown: true"));
    }

    #[test]
    fn test_request_after_shutdown_is_rejected() {
        let bucket = TokenBucket::new(5, LONG).unwrap();
        assert!(bucket.request());

        bucket.shutdown();
        assert!(bucket.is_shut_down());
        assert!(!bucket.request());
        // The count is left as it was
        assert_eq!(bucket.available(), 4);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let bucket = TokenBucket::new(1, LONG).unwrap();
        bucket.shutdown();
        bucket.shutdown();
        assert!(bucket.is_shut_down());
        // Drop calls it a third time
    }

    #[test]
    fn test_shutdown_does_not_wait_for_period() {
        let bucket = TokenBucket::new(1000, LONG).unwrap();
        let start = Instant::now();
        drop(bucket);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_refill_resets_to_capacity() {
        let bucket = TokenBucket::new(2, Duration::from_millis(50)).unwrap();
        assert!(bucket.request());
        assert!(bucket.request());
        assert!(!bucket.request());

        std::thread::sleep(Duration::from_millis(200));
        assert!(bucket.refills() >= 1);
        assert_eq!(bucket.available(), 2);
    }

    #[test]
    fn test_add_mode_tops_up() {
        let (tx, rx) = mpsc::channel();
        let config = BucketConfig::new(4, Duration::from_millis(50))
            .refill_mode(RefillMode::Add(1))
            .on_refill(move |event| {
                let _ = tx.send(event);
            });
        let bucket = TokenBucket::with_config(config).unwrap();
        for _ in 0..4 {
            assert!(bucket.request());
        }

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.previous, 0);
        assert_eq!(first.current, 1);
        assert_eq!(first.sequence, 1);
    }

    #[test]
    fn test_on_refill_runs_outside_lock() {
        let (tx, rx) = mpsc::channel();
        let observed = Arc::new(Mutex::new(None::<u32>));
        let observed_in_callback = observed.clone();
        let slot: Arc<Mutex<Option<std::sync::Weak<TokenBucket>>>> = Arc::new(Mutex::new(None));
        let slot_in_callback = slot.clone();

        let config = BucketConfig::new(3, Duration::from_millis(30)).on_refill(move |event| {
            // Reading the bucket from here would deadlock if the lock were still held
            let bucket = slot_in_callback.lock().unwrap().as_ref().and_then(|w| w.upgrade());
            if let Some(bucket) = bucket {
                *observed_in_callback.lock().unwrap() = Some(bucket.available());
            }
            let _ = tx.send(event);
        });
        let bucket = Arc::new(TokenBucket::with_config(config).unwrap());
        *slot.lock().unwrap() = Some(Arc::downgrade(&bucket));

        // Wait for a refill that happened after the bucket was published
        let deadline = Instant::now() + Duration::from_secs(5);
        while observed.lock().unwrap().is_none() {
            let _ = rx.recv_timeout(Duration::from_millis(100));
            assert!(Instant::now() < deadline, "callback never saw the bucket");
        }
        assert_eq!(*observed.lock().unwrap(), Some(3));
    }

    #[test]
    fn test_no_refill_after_shutdown() {
        let (tx, rx) = mpsc::channel();
        let config = BucketConfig::new(1, Duration::from_millis(10)).on_refill(move |event| {
            let _ = tx.send(event);
        });
        let bucket = TokenBucket::with_config(config).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        bucket.shutdown();

        let refills = bucket.refills();
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(bucket.refills(), refills);

        // The callback (and its sender) went away with the refiller thread
        let delivered = rx.iter().count() as u64;
        assert_eq!(delivered, refills);
    }

    #[test]
    fn test_refill_locked_is_idempotent_in_reset_mode() {
        let bucket = TokenBucket::new(7, LONG).unwrap();
        for _ in 0..5 {
            assert!(bucket.request());
        }

        let mut state = bucket.shared.lock();
        for _ in 0..10 {
            let event = bucket.shared.refill_locked(&mut state);
            assert_eq!(event.current, 7);
        }
        assert_eq!(state.tokens, 7);
        assert_eq!(state.refills, 10);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Request,
        Refill,
    }

    fn any_op() -> impl Strategy<Value = Op> {
        prop_oneof![4 => Just(Op::Request), 1 => Just(Op::Refill)]
    }

    fn any_mode() -> impl Strategy<Value = RefillMode> {
        prop_oneof![Just(RefillMode::Reset), (1u32..20).prop_map(RefillMode::Add)]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        /// The count never leaves `[0, capacity]`, and between refills no more requests are
        /// admitted than there were tokens when the run started.
        #[test]
        fn prop_count_stays_within_capacity(
            capacity in 1u32..50,
            mode in any_mode(),
            ops in proptest::collection::vec(any_op(), 0..200),
        ) {
            let config = BucketConfig::new(capacity, LONG).refill_mode(mode);
            let bucket = TokenBucket::with_config(config).unwrap();

            let mut run_start = bucket.available();
            let mut admitted_in_run = 0u32;
            for op in ops {
                match op {
                    Op::Request => {
                        if bucket.request() {
                            admitted_in_run += 1;
                        }
                        prop_assert!(admitted_in_run <= run_start);
                    }
                    Op::Refill => {
                        let mut state = bucket.shared.lock();
                        let event = bucket.shared.refill_locked(&mut state);
                        prop_assert!(event.current >= event.previous);
                        run_start = state.tokens;
                        admitted_in_run = 0;
                    }
                }
                let available = bucket.available();
                prop_assert!(available <= capacity);
                prop_assert_eq!(available, run_start - admitted_in_run);
            }
        }

        /// Refilling any number of times with no requests in between lands on capacity
        /// in reset mode and never goes past it in either mode.
        #[test]
        fn prop_refill_never_exceeds_capacity(
            capacity in 1u32..1000,
            drained in 0u32..1000,
            refills in 1usize..20,
            mode in any_mode(),
        ) {
            let config = BucketConfig::new(capacity, LONG).refill_mode(mode);
            let bucket = TokenBucket::with_config(config).unwrap();
            for _ in 0..drained.min(capacity) {
                bucket.request();
            }

            let mut state = bucket.shared.lock();
            for _ in 0..refills {
                bucket.shared.refill_locked(&mut state);
                prop_assert!(state.tokens <= capacity);
            }
            if mode == RefillMode::Reset {
                prop_assert_eq!(state.tokens, capacity);
            }
        }
    }
}
