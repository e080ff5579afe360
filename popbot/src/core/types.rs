//! Shared deterministic types for the run loop.
//!
//! These types define stable contracts between the batch runner, the
//! lifecycle controller and the stats store.

use std::fmt;
use std::time::Duration;

use crate::exit_codes;

/// Immutable scheduling parameters for one process lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Clicks per batch before clamping to the ceiling.
    pub batch_size: u64,
    /// Delay between the end of one tick and the start of the next.
    pub interval: Duration,
    /// Stats key and `country` cookie value.
    pub category: String,
    /// Total confirmed clicks after which the bot stops; `None` is unbounded.
    pub max_total: Option<u64>,
}

/// Classified result of a single batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The confirming response arrived; `count` clicks were accepted.
    Confirmed { count: u64 },
    /// Our own bounded wait elapsed before the actuator answered.
    TimedOut,
    /// The session is gone (or wedged) and cannot be used any further.
    ActuatorClosed { reason: String },
    /// The page flagged the session as automated.
    Blocked,
    /// Any other actuator error. Counted, never fatal.
    Failed { reason: String },
}

/// Counter increments for one category, applied additively.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchDelta {
    pub sent: u64,
    pub succeeded: u64,
    pub failed: u64,
}

impl BatchDelta {
    pub fn confirmed(count: u64) -> Self {
        Self {
            sent: count,
            succeeded: count,
            failed: 0,
        }
    }

    pub fn failed(count: u64) -> Self {
        Self {
            sent: 0,
            succeeded: 0,
            failed: count,
        }
    }
}

/// Controller lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Stopping,
    Stopped,
}

/// Why the controller entered `Stopping`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// `max_total` confirmed clicks were sent.
    CeilingReached { max_total: u64 },
    /// The page flagged the session.
    Blocked,
    /// The actuator closed or stopped answering.
    SessionClosed { reason: String },
    /// An OS signal asked us to stop.
    Signal { name: String },
    /// Setup failed, a batch panicked, or an unclassified error escaped a tick.
    Fatal { message: String },
}

impl StopReason {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal { .. })
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_fatal() {
            exit_codes::FATAL
        } else {
            exit_codes::OK
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CeilingReached { max_total } => write!(f, "max total ({max_total}) reached"),
            Self::Blocked => write!(f, "session marked as a bot"),
            Self::SessionClosed { reason } => write!(f, "session closed: {reason}"),
            Self::Signal { name } => write!(f, "{name} received"),
            Self::Fatal { message } => write!(f, "fatal: {message}"),
        }
    }
}
