//! Time sources for normalization.
//!
//! Wall-clock time judges staleness; monotonic time orders quotes. Both are
//! injected so replay and tests can drive them deterministically.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

/// Process-wide origin shared by every [`SystemClock`].
static MONOTONIC_ORIGIN: LazyLock<Instant> = LazyLock::new(Instant::now);

/// Source of wall-clock and monotonic time.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn wall_now(&self) -> DateTime<Utc>;

    /// Elapsed time since the clock origin. Never decreases.
    fn monotonic_now(&self) -> Duration;
}

/// Clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn wall_now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn monotonic_now(&self) -> Duration {
        MONOTONIC_ORIGIN.elapsed()
    }
}

/// Manually driven clock for replay and tests.
#[derive(Debug)]
pub struct ManualClock {
    wall_nanos: AtomicI64,
    monotonic_nanos: AtomicU64,
}

impl ManualClock {
    /// Create a clock frozen at the given wall time and zero monotonic time.
    #[must_use]
    pub fn new(wall: DateTime<Utc>) -> Self {
        Self {
            wall_nanos: AtomicI64::new(wall_nanos(wall)),
            monotonic_nanos: AtomicU64::new(0),
        }
    }

    /// Move both wall and monotonic time forward.
    pub fn advance(&self, by: Duration) {
        let nanos = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        self.wall_nanos
            .fetch_add(i64::try_from(nanos).unwrap_or(i64::MAX), Ordering::SeqCst);
        self.monotonic_nanos.fetch_add(nanos, Ordering::SeqCst);
    }

    /// Set the wall clock without touching monotonic time (simulates skew).
    pub fn set_wall(&self, wall: DateTime<Utc>) {
        self.wall_nanos.store(wall_nanos(wall), Ordering::SeqCst);
    }
}

/// Nanoseconds since the epoch, saturating outside 1677..2262.
fn wall_nanos(wall: DateTime<Utc>) -> i64 {
    wall.timestamp_nanos_opt().unwrap_or(if wall < DateTime::UNIX_EPOCH {
        i64::MIN
    } else {
        i64::MAX
    })
}

impl Clock for ManualClock {
    fn wall_now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.wall_nanos.load(Ordering::SeqCst))
    }

    fn monotonic_now(&self) -> Duration {
        Duration::from_nanos(self.monotonic_nanos.load(Ordering::SeqCst))
    }
}
