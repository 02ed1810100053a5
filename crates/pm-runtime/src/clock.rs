//! Monotonic clock access for the sampling loop.
//!
//! The scheduler never sleeps for a relative duration. It computes the next
//! absolute deadline and asks the clock to wake it at that instant, so the
//! time spent reading sensors and enqueueing does not accumulate as drift.

use pm_common::time::Timespec;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Monotonic time source with absolute-deadline sleep.
pub trait Clock: Send {
    /// Current monotonic time.
    fn now(&self) -> Timespec;

    /// Block until the clock reaches `deadline`. Returns immediately if the
    /// deadline has already passed. Signals do not end the sleep early.
    fn sleep_until(&self, deadline: Timespec);
}

/// `CLOCK_MONOTONIC` with `clock_nanosleep(TIMER_ABSTIME)`.
#[derive(Debug, Clone, Copy, Default)]
#[cfg(target_os = "linux")]
pub struct MonotonicClock;

#[cfg(target_os = "linux")]
impl MonotonicClock {
    /// Create a handle to the system monotonic clock.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[cfg(target_os = "linux")]
impl Clock for MonotonicClock {
    fn now(&self) -> Timespec {
        use nix::time::{clock_gettime, ClockId};

        // CLOCK_MONOTONIC is always available on Linux
        clock_gettime(ClockId::CLOCK_MONOTONIC)
            .map(|ts| {
                Timespec::new(
                    u64::try_from(ts.tv_sec()).unwrap_or(0),
                    u64::try_from(ts.tv_nsec()).unwrap_or(0),
                )
            })
            .unwrap_or_default()
    }

    fn sleep_until(&self, deadline: Timespec) {
        use nix::errno::Errno;
        use nix::sys::time::TimeSpec;
        use nix::time::{clock_nanosleep, ClockId, ClockNanosleepFlags};

        let request = TimeSpec::new(
            libc::time_t::try_from(deadline.secs()).unwrap_or(libc::time_t::MAX),
            libc::c_long::try_from(deadline.subsec_nanos()).unwrap_or(0),
        );

        loop {
            match clock_nanosleep(
                ClockId::CLOCK_MONOTONIC,
                ClockNanosleepFlags::TIMER_ABSTIME,
                &request,
            ) {
                // An absolute deadline survives interruption unchanged
                Err(Errno::EINTR) => continue,
                Err(e) => {
                    tracing::warn!(%deadline, "clock_nanosleep failed: {e}");
                    return;
                }
                Ok(_) => return,
            }
        }
    }
}

/// Portable fallback measured from the moment the clock was created.
#[derive(Debug, Clone, Copy)]
#[cfg(not(target_os = "linux"))]
pub struct MonotonicClock {
    origin: std::time::Instant,
}

#[cfg(not(target_os = "linux"))]
impl MonotonicClock {
    /// Create a clock whose origin is now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

#[cfg(not(target_os = "linux"))]
impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(not(target_os = "linux"))]
impl Clock for MonotonicClock {
    fn now(&self) -> Timespec {
        Timespec::from(self.origin.elapsed())
    }

    fn sleep_until(&self, deadline: Timespec) {
        let now = self.now();
        if deadline > now {
            std::thread::sleep(std::time::Duration::from_nanos(
                deadline.saturating_nanos_since(now),
            ));
        }
    }
}

#[derive(Debug, Default)]
struct SimulatedState {
    now: Timespec,
    /// Every deadline passed to `sleep_until`, in call order.
    deadlines: Vec<Timespec>,
    /// Added to the clock after each wake-up.
    wake_latency_ns: u64,
}

/// Manually driven clock for tests.
///
/// Sleeping jumps the clock straight to the deadline (plus the configured
/// wake latency) and records the deadline. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct SimulatedClock {
    state: Arc<Mutex<SimulatedState>>,
}

impl SimulatedClock {
    /// Create a clock reading `start`.
    #[must_use]
    pub fn new(start: Timespec) -> Self {
        let clock = Self::default();
        clock.lock().now = start;
        clock
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the clock forward, e.g. to model the latency of a sensor read.
    pub fn advance(&self, nanos: u64) {
        let mut state = self.lock();
        state.now = state.now + Timespec::from_nanos(nanos);
    }

    /// Delay every wake-up by `nanos` past its deadline.
    pub fn set_wake_latency(&self, nanos: u64) {
        self.lock().wake_latency_ns = nanos;
    }

    /// Deadlines requested so far.
    #[must_use]
    pub fn deadlines(&self) -> Vec<Timespec> {
        self.lock().deadlines.clone()
    }
}

impl Clock for SimulatedClock {
    fn now(&self) -> Timespec {
        self.lock().now
    }

    fn sleep_until(&self, deadline: Timespec) {
        let mut state = self.lock();
        state.deadlines.push(deadline);
        if deadline > state.now {
            state.now = deadline;
        }
        let latency = Timespec::from_nanos(state.wake_latency_ns);
        state.now = state.now + latency;
    }
}
