//! In-memory run counters and the per-tick transition rules.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::core::ceiling::ceiling_reached;
use crate::core::types::{BatchDelta, BatchOutcome, StopReason};

/// Running totals for the current process, owned by the lifecycle controller.
///
/// All counters count clicks, not batches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    /// Confirmed clicks. Bounded by `max_total` when set.
    pub total_sent: u64,
    /// Confirmed clicks (mirrors `total_sent`, kept for the summary block).
    pub succeeded: u64,
    /// Clicks issued in batches that were never confirmed.
    pub failed: u64,
    pub stopped: bool,
    pub started_at: DateTime<Utc>,
}

/// What the controller should do after applying a batch outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickDecision {
    Continue,
    Stop(StopReason),
}

/// Result of [`RunState::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickResult {
    /// Increments to persist for the category, if any counter moved.
    pub delta: Option<BatchDelta>,
    pub decision: TickDecision,
}

impl RunState {
    pub fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            total_sent: 0,
            succeeded: 0,
            failed: 0,
            stopped: false,
            started_at,
        }
    }

    /// Apply the outcome of a batch of `size` clicks.
    ///
    /// Confirmed counts never exceed `size`, so `total_sent` stays within a
    /// ceiling that `size` was clamped to.
    pub fn apply(&mut self, size: u64, outcome: &BatchOutcome, max_total: Option<u64>) -> TickResult {
        match outcome {
            BatchOutcome::Confirmed { count } => {
                let count = (*count).min(size);
                self.total_sent += count;
                self.succeeded += count;
                let decision = match max_total {
                    Some(max) if ceiling_reached(max_total, self.total_sent) => {
                        TickDecision::Stop(StopReason::CeilingReached { max_total: max })
                    }
                    _ => TickDecision::Continue,
                };
                TickResult {
                    delta: Some(BatchDelta::confirmed(count)),
                    decision,
                }
            }
            BatchOutcome::TimedOut | BatchOutcome::Failed { .. } => {
                self.failed += size;
                TickResult {
                    delta: Some(BatchDelta::failed(size)),
                    decision: TickDecision::Continue,
                }
            }
            BatchOutcome::ActuatorClosed { reason } => {
                self.failed += size;
                TickResult {
                    delta: Some(BatchDelta::failed(size)),
                    decision: TickDecision::Stop(StopReason::SessionClosed {
                        reason: reason.clone(),
                    }),
                }
            }
            // Blocked batches never issue clicks.
            BatchOutcome::Blocked => TickResult {
                delta: None,
                decision: TickDecision::Stop(StopReason::Blocked),
            },
        }
    }
}

/// Human-readable elapsed time: `"42s"` under a minute, `"3m 7s"` otherwise.
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let mins = secs / 60;
    if mins > 0 {
        format!("{mins}m {}s", secs % 60)
    } else {
        format!("{secs}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> RunState {
        RunState::new(Utc::now())
    }

    #[test]
    fn confirmed_batch_adds_clicks_and_continues() {
        let mut state = state();
        let result = state.apply(800, &BatchOutcome::Confirmed { count: 800 }, None);

        assert_eq!(state.total_sent, 800);
        assert_eq!(state.succeeded, 800);
        assert_eq!(state.failed, 0);
        assert_eq!(result.delta, Some(BatchDelta::confirmed(800)));
        assert_eq!(result.decision, TickDecision::Continue);
    }

    #[test]
    fn confirmed_batch_hitting_ceiling_stops() {
        let mut state = state();
        state.total_sent = 1_900;
        let result = state.apply(100, &BatchOutcome::Confirmed { count: 100 }, Some(2_000));

        assert_eq!(state.total_sent, 2_000);
        assert_eq!(
            result.decision,
            TickDecision::Stop(StopReason::CeilingReached { max_total: 2_000 })
        );
    }

    #[test]
    fn confirmed_count_is_capped_at_batch_size() {
        let mut state = state();
        state.apply(100, &BatchOutcome::Confirmed { count: 800 }, Some(100));
        assert_eq!(state.total_sent, 100);
    }

    #[test]
    fn failed_and_timed_out_batches_are_counted_and_tolerated() {
        let mut state = state();
        let failed = state.apply(
            800,
            &BatchOutcome::Failed {
                reason: "net::ERR_FAILED".to_string(),
            },
            Some(10_000),
        );
        let timed_out = state.apply(800, &BatchOutcome::TimedOut, Some(10_000));

        assert_eq!(state.total_sent, 0);
        assert_eq!(state.failed, 1_600);
        assert_eq!(failed.decision, TickDecision::Continue);
        assert_eq!(timed_out.delta, Some(BatchDelta::failed(800)));
        assert_eq!(timed_out.decision, TickDecision::Continue);
    }

    #[test]
    fn actuator_closed_stops_the_run() {
        let mut state = state();
        let result = state.apply(
            800,
            &BatchOutcome::ActuatorClosed {
                reason: "Session closed".to_string(),
            },
            None,
        );
        assert_eq!(
            result.decision,
            TickDecision::Stop(StopReason::SessionClosed {
                reason: "Session closed".to_string()
            })
        );
        assert_eq!(state.failed, 800);
    }

    #[test]
    fn blocked_stops_without_touching_counters() {
        let mut state = state();
        let result = state.apply(800, &BatchOutcome::Blocked, None);
        assert_eq!(result.delta, None);
        assert_eq!(result.decision, TickDecision::Stop(StopReason::Blocked));
        assert_eq!((state.total_sent, state.failed), (0, 0));
    }

    #[test]
    fn total_sent_is_monotonic_across_mixed_outcomes() {
        let mut state = state();
        let outcomes = [
            BatchOutcome::Confirmed { count: 300 },
            BatchOutcome::TimedOut,
            BatchOutcome::Failed {
                reason: "x".to_string(),
            },
            BatchOutcome::Confirmed { count: 300 },
            BatchOutcome::Confirmed { count: 300 },
        ];
        let max_total = Some(700);
        let mut last = 0;
        for outcome in &outcomes {
            let Some(size) =
                crate::core::ceiling::next_batch_size(300, max_total, state.total_sent)
            else {
                break;
            };
            state.apply(size, outcome, max_total);
            assert!(state.total_sent >= last);
            assert!(state.total_sent <= 700);
            last = state.total_sent;
        }
        assert_eq!(state.total_sent, 700);
    }

    #[test]
    fn elapsed_formats_minutes_and_seconds() {
        assert_eq!(format_elapsed(Duration::from_secs(42)), "42s");
        assert_eq!(format_elapsed(Duration::from_secs(187)), "3m 7s");
        assert_eq!(format_elapsed(Duration::from_millis(999)), "0s");
    }
}
