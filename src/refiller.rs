//! The background thread that puts tokens back into a bucket.
//!
//! The refiller sleeps on the bucket's condition variable for one refill period at a time.
//! Shutdown is signalled through the same condition variable, so a sleeping refiller wakes
//! up as soon as the bucket is torn down instead of finishing its period.

use std::{
    io,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, PoisonError},
    thread::{self, JoinHandle},
};

use tracing::{debug, trace, warn};

use crate::{
    bucket::{RefillEvent, Shared},
    config::RefillCallback,
};

/// What ended one wait of the refiller.
#[derive(Debug, PartialEq, Eq)]
enum Wake {
    /// The shutdown flag was set, either before or during the wait.
    Shutdown,
    /// A full period passed and the bucket was refilled.
    Refilled(RefillEvent),
}

struct Refiller {
    shared: Arc<Shared>,
    on_refill: Option<RefillCallback>,
}

pub(crate) fn spawn(
    shared: Arc<Shared>,
    name: String,
    on_refill: Option<RefillCallback>,
) -> io::Result<JoinHandle<()>> {
    let refiller = Refiller { shared, on_refill };
    thread::Builder::new()
        .name(name)
        .spawn(move || refiller.run())
}

impl Refiller {
    fn run(self) {
        debug!(period = ?self.shared.refill_period, "refiller started");

        while let Wake::Refilled(event) = self.wait() {
            trace!(
                previous = event.previous,
                current = event.current,
                sequence = event.sequence,
                "bucket refilled"
            );
            // The lock is released by now, so the callback is free to use the bucket
            if let Some(on_refill) = &self.on_refill {
                // A panicking callback must not stop the refills
                if panic::catch_unwind(AssertUnwindSafe(|| on_refill(event))).is_err() {
                    warn!(sequence = event.sequence, "on_refill callback panicked");
                }
            }
        }

        debug!("refiller stopped");
    }

    /// Sleep for one refill period, then refill unless shutdown was requested.
    ///
    /// Spurious wake-ups go back to sleep for whatever is left of the period.
    fn wait(&self) -> Wake {
        let state = self.shared.lock();
        if state.shutdown {
            return Wake::Shutdown;
        }

        let (mut state, _) = self
            .shared
            .wake
            .wait_timeout_while(state, self.shared.refill_period, |state| !state.shutdown)
            .unwrap_or_else(PoisonError::into_inner);
        if state.shutdown {
            return Wake::Shutdown;
        }

        Wake::Refilled(self.shared.refill_locked(&mut state))
    }
}
