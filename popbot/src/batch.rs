//! Orchestration for a single click batch.

use std::time::Duration;

use tracing::{debug, instrument, warn};

use crate::core::classifier::classify_actuator_error;
use crate::core::types::BatchOutcome;
use crate::io::actuator::{Actuator, ResponseMatcher, WaitId};
use crate::io::config::TargetConfig;

/// How long the actuator may take to observe the confirming response.
pub const CONFIRM_TIMEOUT: Duration = Duration::from_secs(10);
/// Our own deadline on top of `CONFIRM_TIMEOUT`. Only an actuator that stops
/// answering altogether runs into it.
const CONFIRM_GRACE: Duration = Duration::from_secs(5);
const WAIT_DEADLINE: Duration = CONFIRM_TIMEOUT.saturating_add(CONFIRM_GRACE);

/// Sends batches of clicks and waits for one confirming response per batch.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    selector: String,
    matcher: ResponseMatcher,
}

impl BatchRunner {
    pub fn new(target: &TargetConfig) -> Self {
        Self {
            selector: target.click_selector.clone(),
            matcher: ResponseMatcher::from_target(target),
        }
    }

    /// Run one batch of `size` clicks.
    ///
    /// The confirmation wait is armed before the first click and awaited after
    /// the last one. Errors never escape: they are classified into the outcome.
    #[instrument(skip(self, actuator))]
    pub async fn run_batch<A: Actuator + ?Sized>(&self, actuator: &mut A, size: u64) -> BatchOutcome {
        match actuator.is_flagged().await {
            Ok(true) => return BatchOutcome::Blocked,
            Ok(false) => {}
            Err(err) => return classify("check bot flag", &err),
        }

        let wait = match actuator.arm_confirmation(&self.matcher).await {
            Ok(wait) => wait,
            Err(err) => return classify("arm confirmation", &err),
        };
        debug!(?wait, "confirmation armed");

        for clicked in 0..size {
            if let Err(err) = actuator.click(&self.selector).await {
                debug!(clicked, "click failed mid-batch");
                let outcome = classify("click", &err);
                settle_wait(actuator, wait).await;
                return outcome;
            }
        }

        match tokio::time::timeout(WAIT_DEADLINE, actuator.await_confirmation(wait, CONFIRM_TIMEOUT))
            .await
        {
            Ok(Ok(response)) => {
                debug!(status = response.status, body = ?response.body, "batch confirmed");
                BatchOutcome::Confirmed { count: size }
            }
            Ok(Err(err)) => classify("await confirmation", &err),
            Err(_) => {
                warn!(
                    timeout_secs = WAIT_DEADLINE.as_secs(),
                    "actuator never answered the confirmation wait"
                );
                BatchOutcome::TimedOut
            }
        }
    }
}

/// Resolve an armed wait whose batch was abandoned, so the actuator does not
/// keep it open. The result only matters for the log.
async fn settle_wait<A: Actuator + ?Sized>(actuator: &mut A, wait: WaitId) {
    match tokio::time::timeout(WAIT_DEADLINE, actuator.await_confirmation(wait, CONFIRM_TIMEOUT))
        .await
    {
        Ok(Ok(_)) => debug!(?wait, "abandoned wait confirmed anyway"),
        Ok(Err(err)) => debug!(?wait, error = %err, "abandoned wait released"),
        Err(_) => debug!(?wait, "abandoned wait never answered"),
    }
}

fn classify(stage: &str, err: &anyhow::Error) -> BatchOutcome {
    let message = format!("{err:#}");
    warn!(stage, error = %message, "batch error");
    classify_actuator_error(&message)
}
