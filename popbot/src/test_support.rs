//! Test-only scripted actuator and config helpers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::core::types::RunConfig;
use crate::io::actuator::{Actuator, ConfirmedResponse, ResponseMatcher, WaitId};

/// How the scripted actuator answers one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptedBatch {
    /// Confirm immediately.
    Confirm,
    /// Confirm after a (virtual) delay.
    ConfirmAfter(Duration),
    /// Fail the confirmation wait with this message.
    Fail(String),
    /// Fail the first click with this message.
    ClickFails(String),
    /// Never answer the confirmation wait.
    Hang,
    /// Report the session as flagged before arming.
    Flagged,
    /// Panic inside the confirmation wait.
    Panic,
}

/// Everything the scripted actuator was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActuatorEvent {
    Navigate(String),
    SetCookie { name: String, value: String },
    Armed,
    Click,
    Awaited,
    Closed,
}

#[derive(Debug, Default)]
struct ScriptState {
    script: VecDeque<ScriptedBatch>,
    current: Option<ScriptedBatch>,
    events: Vec<ActuatorEvent>,
    fail_navigate: Option<String>,
    panic_navigate: bool,
    next_wait: u64,
}

/// Actuator that answers from a queue of [`ScriptedBatch`]es.
///
/// Once the queue is empty every batch is confirmed.
pub struct ScriptedActuator {
    state: Arc<Mutex<ScriptState>>,
}

/// Read-only view of a [`ScriptedActuator`] that outlives the controller.
#[derive(Clone)]
pub struct ActuatorProbe {
    state: Arc<Mutex<ScriptState>>,
}

fn lock(state: &Mutex<ScriptState>) -> MutexGuard<'_, ScriptState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ScriptedActuator {
    pub fn new(script: Vec<ScriptedBatch>) -> (Self, ActuatorProbe) {
        let state = Arc::new(Mutex::new(ScriptState {
            script: script.into(),
            ..ScriptState::default()
        }));
        (
            Self {
                state: state.clone(),
            },
            ActuatorProbe { state },
        )
    }

    /// An actuator whose every `navigate` fails with `message`.
    pub fn failing_setup(message: &str) -> (Self, ActuatorProbe) {
        let (actuator, probe) = Self::new(Vec::new());
        lock(&actuator.state).fail_navigate = Some(message.to_string());
        (actuator, probe)
    }

    /// An actuator whose `navigate` panics.
    pub fn panicking_setup() -> (Self, ActuatorProbe) {
        let (actuator, probe) = Self::new(Vec::new());
        lock(&actuator.state).panic_navigate = true;
        (actuator, probe)
    }
}

#[async_trait]
impl Actuator for ScriptedActuator {
    async fn navigate(&mut self, url: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if state.panic_navigate {
            drop(state);
            panic!("scripted setup panic");
        }
        if let Some(message) = &state.fail_navigate {
            return Err(anyhow!(message.clone()));
        }
        state.events.push(ActuatorEvent::Navigate(url.to_string()));
        Ok(())
    }

    async fn set_cookie(&mut self, name: &str, value: &str) -> Result<()> {
        lock(&self.state).events.push(ActuatorEvent::SetCookie {
            name: name.to_string(),
            value: value.to_string(),
        });
        Ok(())
    }

    async fn click(&mut self, _selector: &str) -> Result<()> {
        let mut state = lock(&self.state);
        if let Some(ScriptedBatch::ClickFails(message)) = &state.current {
            return Err(anyhow!(message.clone()));
        }
        state.events.push(ActuatorEvent::Click);
        Ok(())
    }

    async fn arm_confirmation(&mut self, _matcher: &ResponseMatcher) -> Result<WaitId> {
        let mut state = lock(&self.state);
        let batch = state.script.pop_front().unwrap_or(ScriptedBatch::Confirm);
        state.current = Some(batch);
        state.events.push(ActuatorEvent::Armed);
        state.next_wait += 1;
        Ok(WaitId(state.next_wait))
    }

    async fn await_confirmation(
        &mut self,
        _wait: WaitId,
        _timeout: Duration,
    ) -> Result<ConfirmedResponse> {
        let batch = {
            let mut state = lock(&self.state);
            state.events.push(ActuatorEvent::Awaited);
            state.current.take()
        };
        let confirmed = ConfirmedResponse {
            status: 201,
            body: Some("{}".to_string()),
        };
        match batch {
            None | Some(ScriptedBatch::Confirm) => Ok(confirmed),
            Some(ScriptedBatch::ConfirmAfter(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(confirmed)
            }
            Some(ScriptedBatch::Fail(message) | ScriptedBatch::ClickFails(message)) => {
                Err(anyhow!(message))
            }
            Some(ScriptedBatch::Hang) => std::future::pending().await,
            Some(ScriptedBatch::Panic) => panic!("scripted actuator panic"),
            Some(ScriptedBatch::Flagged) => Err(anyhow!("flagged batch was armed")),
        }
    }

    async fn is_flagged(&mut self) -> Result<bool> {
        let mut state = lock(&self.state);
        if state.script.front() == Some(&ScriptedBatch::Flagged) {
            state.script.pop_front();
            return Ok(true);
        }
        Ok(false)
    }

    async fn close(&mut self) -> Result<()> {
        lock(&self.state).events.push(ActuatorEvent::Closed);
        Ok(())
    }
}

impl ActuatorProbe {
    pub fn events(&self) -> Vec<ActuatorEvent> {
        lock(&self.state).events.clone()
    }

    /// Clicks issued per armed batch, in order.
    pub fn batch_sizes(&self) -> Vec<u64> {
        let mut sizes = Vec::new();
        for event in &lock(&self.state).events {
            match event {
                ActuatorEvent::Armed => sizes.push(0),
                ActuatorEvent::Click => {
                    if let Some(last) = sizes.last_mut() {
                        *last += 1;
                    }
                }
                _ => {}
            }
        }
        sizes
    }

    pub fn clicks(&self) -> usize {
        self.count(&ActuatorEvent::Click)
    }

    pub fn closes(&self) -> usize {
        self.count(&ActuatorEvent::Closed)
    }

    /// True when no click was issued before its batch's confirmation was armed.
    pub fn armed_before_clicks(&self) -> bool {
        let state = lock(&self.state);
        let first_click = state
            .events
            .iter()
            .position(|event| *event == ActuatorEvent::Click);
        let first_arm = state
            .events
            .iter()
            .position(|event| *event == ActuatorEvent::Armed);
        match (first_arm, first_click) {
            (_, None) => true,
            (Some(arm), Some(click)) => arm < click,
            (None, Some(_)) => false,
        }
    }

    fn count(&self, wanted: &ActuatorEvent) -> usize {
        lock(&self.state)
            .events
            .iter()
            .filter(|event| *event == wanted)
            .count()
    }
}

/// Deterministic run config: category `PH`, 30 s interval.
pub fn run_config(batch_size: u64, max_total: Option<u64>) -> RunConfig {
    RunConfig {
        batch_size,
        interval: Duration::from_secs(30),
        category: "PH".to_string(),
        max_total,
    }
}
