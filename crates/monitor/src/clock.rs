//! Time source used to stamp snapshots.
//!
//! Every payload is stamped on receipt, so snapshots from both transports
//! are ordered on this one clock whatever the server's clock says. The
//! stamp must be strictly increasing, otherwise two snapshots
//! received within the clock's resolution would compare equal and the
//! second would be discarded as stale.

use std::sync::Arc;

use chrono::Utc;
use jobsync_core::types::Timestamp;
use parking_lot::Mutex;

/// Source of wall-clock time.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// [`Clock`] backed by the system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// [`Clock`] that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, now: Timestamp) {
        *self.now.lock() = now;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Smallest step between two local stamps.
fn stamp_step() -> chrono::Duration {
    chrono::Duration::microseconds(1)
}

/// Hands out strictly increasing receipt stamps from a [`Clock`].
pub struct Stamper {
    clock: Arc<dyn Clock>,
    last: Mutex<Option<Timestamp>>,
}

impl Stamper {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            last: Mutex::new(None),
        }
    }

    /// The current time, or one step past the previous stamp if the
    /// clock has not moved (or moved backwards) since.
    pub fn stamp(&self) -> Timestamp {
        let mut last = self.last.lock();
        let now = self.clock.now();
        let stamp = match *last {
            Some(prev) if now <= prev => prev + stamp_step(),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }

    /// A stamp strictly after both `floor` and every previous stamp.
    pub fn stamp_after(&self, floor: Timestamp) -> Timestamp {
        let mut last = self.last.lock();
        let mut stamp = self.clock.now();
        if let Some(prev) = *last {
            stamp = stamp.max(prev + stamp_step());
        }
        stamp = stamp.max(floor + stamp_step());
        *last = Some(stamp);
        stamp
    }
}
