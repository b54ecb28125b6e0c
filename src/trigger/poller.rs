use std::time::Duration;

use crate::{
    config::TriggerConfig,
    errors::Result,
    trigger::{
        PollDelay, PollerAction, PollerEvent, PollerState, TriggerReading, TriggerRecord,
        TriggerStore,
    },
};
use async_trait::async_trait;
use tracing::{debug, error, info, warn};

/// Whatever runs once the trigger fires. An error is logged; the trigger is
/// still reset afterwards.
#[async_trait]
pub trait PipelineRunner: Send {
    async fn run(&mut self, prompt: &str) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerExit {
    Completed { prompt: String },
    ResetFailed(String),
}

/// I/O driver around [`PollerState`]: reads the store, sleeps, runs the
/// pipeline and writes the reset record.
pub struct TriggerPoller<S, R> {
    store: S,
    runner: R,
    idle_poll: Duration,
    inactive_poll: Duration,
    fault_retry: Duration,
}

impl<S: TriggerStore, R: PipelineRunner> TriggerPoller<S, R> {
    pub fn new(store: S, runner: R, config: &TriggerConfig) -> Self {
        Self {
            store,
            runner,
            idle_poll: config.idle_poll,
            inactive_poll: config.inactive_poll,
            fault_retry: config.fault_retry,
        }
    }

    pub async fn run(&mut self) -> PollerExit {
        let (mut state, mut action) = PollerState::initial();
        let mut consecutive_faults = 0u32;
        let mut last_idle_event: Option<PollerEvent> = None;
        let mut last_prompt = String::new();

        loop {
            let event = match action {
                PollerAction::Wait(delay) => {
                    tokio::time::sleep(self.delay(delay)).await;
                    action = PollerAction::Poll;
                    continue;
                }
                PollerAction::Poll => {
                    let event = self.observe().await;
                    match &event {
                        PollerEvent::Fault(reason) => {
                            consecutive_faults += 1;
                            error!(
                                target: "trigger_poller",
                                error = %reason,
                                consecutive_faults,
                                "failed to read trigger, retrying"
                            );
                        }
                        PollerEvent::Absent | PollerEvent::Empty => {
                            consecutive_faults = 0;
                            if last_idle_event.as_ref() != Some(&event) {
                                warn!(
                                    target: "trigger_poller",
                                    reason = ?event,
                                    "no trigger record yet, waiting"
                                );
                            }
                        }
                        _ => consecutive_faults = 0,
                    }
                    last_idle_event = Some(event.clone());
                    event
                }
                PollerAction::Inspect => PollerEvent::Inspected,
                PollerAction::Run(prompt) => {
                    info!(target: "trigger_poller", %prompt, "trigger activated, running pipeline");
                    if let Err(err) = self.runner.run(&prompt).await {
                        error!(
                            target: "trigger_poller",
                            %prompt,
                            error = %err,
                            "pipeline run failed"
                        );
                    }
                    last_prompt = prompt;
                    PollerEvent::PipelineFinished
                }
                PollerAction::Reset => match self.store.write(&TriggerRecord::deactivated()).await {
                    Ok(()) => {
                        info!(target: "trigger_poller", "trigger reset to inactive");
                        PollerEvent::ResetWritten
                    }
                    Err(err) => PollerEvent::ResetFailed(err.to_string()),
                },
                PollerAction::Exit => {
                    return PollerExit::Completed {
                        prompt: last_prompt,
                    };
                }
                PollerAction::Abort(reason) => {
                    error!(
                        target: "trigger_poller",
                        error = %reason,
                        "cannot reset trigger, stopping"
                    );
                    return PollerExit::ResetFailed(reason);
                }
            };

            let (next_state, next_action) = state.advance(event);
            if let PollerAction::Wait(PollDelay::Inactive) = next_action {
                debug!(target: "trigger_poller", "trigger present but inactive");
            }
            state = next_state;
            action = next_action;
        }
    }

    async fn observe(&self) -> PollerEvent {
        match self.store.read().await {
            Ok(TriggerReading::Absent) => PollerEvent::Absent,
            Ok(TriggerReading::Empty) => PollerEvent::Empty,
            Ok(TriggerReading::Record(record)) => PollerEvent::Parsed(record),
            Err(err) => PollerEvent::Fault(err.to_string()),
        }
    }

    fn delay(&self, delay: PollDelay) -> Duration {
        match delay {
            PollDelay::Idle => self.idle_poll,
            PollDelay::Inactive => self.inactive_poll,
            PollDelay::Fault => self.fault_retry,
        }
    }
}
