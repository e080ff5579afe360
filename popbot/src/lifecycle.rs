//! Run loop and shutdown orchestration for `popbot run`.
//!
//! The [`LifecycleController`] owns the actuator, the [`RunState`] and the
//! schedule. Ticks are strictly sequential: the next delay is only armed once
//! the previous batch has been classified and persisted. Stop requests (OS
//! signals) arrive on a `watch` channel and are honoured between ticks, so an
//! in-flight batch always runs to its outcome before shutdown.

use std::panic::AssertUnwindSafe;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use futures::FutureExt;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::batch::BatchRunner;
use crate::core::ceiling::next_batch_size;
use crate::core::run_state::{RunState, TickDecision, format_elapsed};
use crate::core::types::{BatchOutcome, Phase, RunConfig, StopReason};
use crate::io::actuator::Actuator;
use crate::io::config::TargetConfig;
use crate::io::stats_store::StatsStore;

/// Receiving side of the stop channel held by the controller.
pub type StopReceiver = watch::Receiver<Option<StopReason>>;
/// Sending side of the stop channel, held by signal listeners and tests.
pub type StopSender = watch::Sender<Option<StopReason>>;

/// Create an empty stop channel.
pub fn stop_channel() -> (StopSender, StopReceiver) {
    watch::channel(None)
}

/// Ask the controller to stop. Only the first request is kept.
pub fn request_stop(tx: &StopSender, reason: StopReason) -> bool {
    tx.send_if_modified(|current| {
        if current.is_some() {
            return false;
        }
        *current = Some(reason);
        true
    })
}

/// Final totals of a run, logged at shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub reason: StopReason,
    pub total_sent: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn exit_code(&self) -> i32 {
        self.reason.exit_code()
    }
}

pub struct LifecycleController<A: Actuator> {
    config: RunConfig,
    target: TargetConfig,
    runner: BatchRunner,
    stats: StatsStore,
    actuator: Option<A>,
    state: RunState,
    phase: Phase,
    stop_rx: StopReceiver,
    started: Instant,
    summary: Option<RunSummary>,
}

impl<A: Actuator> LifecycleController<A> {
    pub fn new(
        config: RunConfig,
        target: TargetConfig,
        stats: StatsStore,
        actuator: A,
        stop_rx: StopReceiver,
    ) -> Self {
        Self {
            runner: BatchRunner::new(&target),
            config,
            target,
            stats,
            actuator: Some(actuator),
            state: RunState::new(Utc::now()),
            phase: Phase::Idle,
            stop_rx,
            started: Instant::now(),
            summary: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Set up the session, run ticks until something stops us, then shut down.
    ///
    /// A panic anywhere in setup or the loop becomes [`StopReason::Fatal`] and
    /// still goes through [`Self::shutdown`].
    pub async fn run(&mut self) -> RunSummary {
        self.started = Instant::now();
        self.state.started_at = Utc::now();

        let reason = match AssertUnwindSafe(self.drive()).catch_unwind().await {
            Ok(reason) => reason,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(%message, phase = ?self.phase, "run panicked");
                StopReason::Fatal {
                    message: format!("panicked: {message}"),
                }
            }
        };
        self.shutdown(reason).await
    }

    async fn drive(&mut self) -> StopReason {
        let Some(actuator) = self.actuator.as_mut() else {
            return StopReason::Fatal {
                message: "actuator already released".to_string(),
            };
        };
        let setup = prepare_session(actuator, &self.target, &self.config.category);
        let ready = tokio::select! {
            biased;
            reason = wait_for_stop(&mut self.stop_rx) => Err(reason),
            result = setup => result.map_err(|err| StopReason::Fatal {
                message: format!("session setup failed: {err:#}"),
            }),
        };
        if let Err(reason) = ready {
            return reason;
        }

        self.phase = Phase::Running;
        info!(
            category = %self.config.category,
            batch_size = self.config.batch_size,
            interval_ms = interval_ms(self.config.interval),
            max_total = ?self.config.max_total,
            "popbot started"
        );

        self.run_loop().await
    }

    async fn run_loop(&mut self) -> StopReason {
        loop {
            let pending = self.stop_rx.borrow_and_update().clone();
            if let Some(reason) = pending {
                return reason;
            }

            let Some(size) = next_batch_size(
                self.config.batch_size,
                self.config.max_total,
                self.state.total_sent,
            ) else {
                return self.ceiling_reason();
            };

            if let TickDecision::Stop(reason) = self.tick(size).await {
                return reason;
            }

            info!(
                wait_ms = interval_ms(self.config.interval),
                "waiting before the next batch"
            );
            tokio::select! {
                biased;
                reason = wait_for_stop(&mut self.stop_rx) => return reason,
                () = tokio::time::sleep(self.config.interval) => {}
            }
        }
    }

    /// Run one batch of `size` clicks and apply its outcome.
    async fn tick(&mut self, size: u64) -> TickDecision {
        let Some(actuator) = self.actuator.as_mut() else {
            return TickDecision::Stop(StopReason::Fatal {
                message: "actuator already released".to_string(),
            });
        };

        info!(size, category = %self.config.category, "sending batch");
        let outcome = self.runner.run_batch(actuator, size).await;

        let result = self.state.apply(size, &outcome, self.config.max_total);
        if let Some(delta) = result.delta {
            self.stats.record_batch(&self.config.category, delta);
        }
        self.log_outcome(size, &outcome);
        result.decision
    }

    fn log_outcome(&self, size: u64, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Confirmed { count } => info!(
                count,
                category = %self.config.category,
                total_sent = self.state.total_sent,
                "batch confirmed"
            ),
            BatchOutcome::TimedOut => warn!(
                size,
                failed = self.state.failed,
                "batch timed out, retrying on the next tick"
            ),
            BatchOutcome::Failed { reason } => warn!(
                size,
                failed = self.state.failed,
                %reason,
                "batch failed, retrying on the next tick"
            ),
            BatchOutcome::ActuatorClosed { reason } => {
                error!(%reason, "browser or page closed, stopping");
            }
            BatchOutcome::Blocked => {
                error!("the page marked this session as a bot; clear its cookies before restarting");
            }
        }
    }

    fn ceiling_reason(&self) -> StopReason {
        StopReason::CeilingReached {
            max_total: self.config.max_total.unwrap_or(self.state.total_sent),
        }
    }

    /// Stop the run: log the summary and release the actuator.
    ///
    /// Idempotent. Later calls return the first summary without touching the
    /// actuator again.
    pub async fn shutdown(&mut self, reason: StopReason) -> RunSummary {
        if let Some(summary) = &self.summary {
            debug!(ignored = %reason, "already stopped");
            return summary.clone();
        }
        self.phase = Phase::Stopping;
        self.state.stopped = true;
        if reason.is_fatal() {
            error!(%reason, "stopping");
        } else {
            info!(%reason, "stopping");
        }

        let elapsed = self.started.elapsed();
        info!("========== stats summary ==========");
        info!("total pops sent:   {}", self.state.total_sent);
        info!("successful pops:   {}", self.state.succeeded);
        info!("failed pops:       {}", self.state.failed);
        info!("elapsed time:      {}", format_elapsed(elapsed));
        info!("===================================");

        if let Some(mut actuator) = self.actuator.take() {
            info!("closing browser session");
            match actuator.close().await {
                Ok(()) => info!("browser session closed"),
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(%error, "error closing browser session");
                }
            }
        }

        self.phase = Phase::Stopped;
        let summary = RunSummary {
            reason,
            total_sent: self.state.total_sent,
            succeeded: self.state.succeeded,
            failed: self.state.failed,
            elapsed,
        };
        self.summary = Some(summary.clone());
        info!("popbot stopped");
        summary
    }
}

fn interval_ms(interval: Duration) -> u64 {
    u64::try_from(interval.as_millis()).unwrap_or(u64::MAX)
}

/// Open the target page with the category cookie set.
async fn prepare_session<A: Actuator + ?Sized>(
    actuator: &mut A,
    target: &TargetConfig,
    category: &str,
) -> Result<()> {
    info!(url = %target.page_url, "navigating to target page");
    actuator.navigate(&target.page_url).await?;
    actuator.set_cookie("country", category).await?;
    // Reload so the page picks up the cookie.
    actuator.navigate(&target.page_url).await?;
    info!(category, "page loaded, category cookie set");
    Ok(())
}

/// Resolve with the first stop request. Never resolves once every sender is gone.
async fn wait_for_stop(rx: &mut StopReceiver) -> StopReason {
    loop {
        let pending = rx.borrow_and_update().clone();
        if let Some(reason) = pending {
            return reason;
        }
        if rx.changed().await.is_err() {
            return std::future::pending().await;
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Forward SIGINT/SIGTERM (Ctrl+C elsewhere) into the stop channel.
///
/// Keeps listening after the first signal so repeated signals are logged
/// instead of killing the process mid-shutdown.
pub fn spawn_signal_listener(tx: StopSender) {
    tokio::spawn(async move {
        loop {
            let name = match wait_for_os_signal().await {
                Ok(name) => name,
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(%error, "signal listener failed");
                    return;
                }
            };
            if request_stop(
                &tx,
                StopReason::Signal {
                    name: name.to_string(),
                },
            ) {
                warn!(signal = name, "signal received, attempting graceful shutdown");
            } else {
                warn!(signal = name, "signal received, already stopping");
            }
        }
    });
}

#[cfg(unix)]
async fn wait_for_os_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = interrupt.recv() => Ok("SIGINT"),
        _ = terminate.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn wait_for_os_signal() -> Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}
