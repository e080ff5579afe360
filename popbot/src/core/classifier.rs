//! Deterministic classification of actuator errors.

use crate::core::types::BatchOutcome;

/// Substrings that mean the session is unusable.
const SESSION_MARKERS: [&str; 2] = ["Timeout", "closed"];

/// Classify an actuator error message into a batch outcome.
///
/// - `ActuatorClosed` if the message mentions `Timeout` or `closed`
///   (case-sensitive, matching what page drivers report).
/// - `Failed` otherwise.
pub fn classify_actuator_error(message: &str) -> BatchOutcome {
    if SESSION_MARKERS
        .iter()
        .any(|marker| message.contains(marker))
    {
        BatchOutcome::ActuatorClosed {
            reason: message.to_string(),
        }
    } else {
        BatchOutcome::Failed {
            reason: message.to_string(),
        }
    }
}
