//! Cooperative cancellation shared by the controller and both worker threads.
//!
//! The token only holds atomics, so it can live in a `static` and be set
//! from a signal handler. Workers poll it at their check points; threads
//! blocked inside the channel are woken by closing the channel.

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Why the acquisition stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum CancelReason {
    /// SIGINT (Ctrl+C).
    Interrupt = 1,
    /// SIGTERM.
    Terminate = 2,
    /// The configured number of samples was taken.
    SampleLimit = 3,
    /// A worker failed during setup.
    Fault = 4,
}

impl CancelReason {
    fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Interrupt),
            2 => Some(Self::Terminate),
            3 => Some(Self::SampleLimit),
            4 => Some(Self::Fault),
            _ => None,
        }
    }

    /// Whether this is a normal termination path rather than an error.
    #[must_use]
    pub fn is_clean(self) -> bool {
        !matches!(self, Self::Fault)
    }
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interrupt => write!(f, "interrupted"),
            Self::Terminate => write!(f, "terminated"),
            Self::SampleLimit => write!(f, "sample limit reached"),
            Self::Fault => write!(f, "fault"),
        }
    }
}

/// Cancellation request flag.
#[derive(Debug, Default)]
pub struct CancelToken {
    /// Set once a cancellation has been requested.
    requested: AtomicBool,
    /// First reason recorded, 0 while none.
    reason: AtomicU8,
}

impl CancelToken {
    /// Create a token with no pending request.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
            reason: AtomicU8::new(0),
        }
    }

    /// Request cancellation. The first reason wins; later calls only
    /// re-assert the flag.
    ///
    /// Async-signal-safe.
    pub fn cancel(&self, reason: CancelReason) {
        let _ = self
            .reason
            .compare_exchange(0, reason as u8, Ordering::AcqRel, Ordering::Acquire);
        self.requested.store(true, Ordering::Release);
    }

    /// Check if cancellation has been requested.
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::Acquire)
    }

    /// Reason of the first cancellation request, if any.
    pub fn reason(&self) -> Option<CancelReason> {
        CancelReason::from_raw(self.reason.load(Ordering::Acquire))
    }
}
