use thiserror::Error;

/// Powermeter error types covering setup failures and per-sample faults.
///
/// Setup errors (`Config`, `Priority`, `MemoryLock`, `Sink`, `Bus`, `Thread`)
/// are fatal: the timing contract cannot be honoured and the process exits.
/// `Sensor` is transient and only ever skips a single tick.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PmError {
    /// Configuration or validation error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Real-time scheduling priority could not be applied.
    #[error("cannot acquire real-time priority: {0}")]
    Priority(String),

    /// Process memory could not be locked.
    #[error("cannot lock memory: {0}")]
    MemoryLock(String),

    /// Output sink could not be opened or written.
    #[error("sink error: {0}")]
    Sink(String),

    /// Sensor bus could not be set up.
    #[error("bus error: {0}")]
    Bus(String),

    /// A single sensor read failed.
    #[error("sensor read failed on channel {channel}: {reason}")]
    Sensor {
        /// Channel selector that failed.
        channel: u8,
        /// Failure description from the sensor layer.
        reason: String,
    },

    /// Worker thread could not be spawned or panicked.
    #[error("thread error: {0}")]
    Thread(String),

    /// Invalid state transition attempted.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state.
        from: String,
        /// Attempted target state.
        to: String,
    },
}

impl PmError {
    /// Process exit status for this error when it terminates the daemon.
    ///
    /// Every fatal class gets its own status so wrappers can tell them apart.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Priority(_) => 3,
            Self::MemoryLock(_) => 4,
            Self::Sink(_) => 5,
            Self::Bus(_) => 6,
            Self::Thread(_) => 7,
            Self::Sensor { .. } | Self::InvalidStateTransition { .. } => 1,
        }
    }

    /// Whether the error is recovered locally instead of aborting the process.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sensor { .. })
    }
}

/// Convenience type alias for powermeter operations.
pub type PmResult<T> = Result<T, PmError>;
