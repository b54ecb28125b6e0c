use crate::trigger::TriggerRecord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Consuming(TriggerRecord),
    Running(String),
    Resetting,
    Terminated,
}

/// Which of the configured sleep intervals to use before polling again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollDelay {
    Idle,
    Inactive,
    Fault,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerAction {
    Poll,
    Wait(PollDelay),
    Inspect,
    Run(String),
    Reset,
    Exit,
    Abort(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerEvent {
    Absent,
    Empty,
    Parsed(TriggerRecord),
    Fault(String),
    Inspected,
    PipelineFinished,
    ResetWritten,
    ResetFailed(String),
}

impl PollerState {
    pub fn initial() -> (Self, PollerAction) {
        (PollerState::Idle, PollerAction::Poll)
    }

    /// Pure transition: no I/O, no clock.
    pub fn advance(self, event: PollerEvent) -> (PollerState, PollerAction) {
        match (self, event) {
            (PollerState::Terminated, _) => (PollerState::Terminated, PollerAction::Exit),

            (PollerState::Idle, PollerEvent::Absent | PollerEvent::Empty) => {
                (PollerState::Idle, PollerAction::Wait(PollDelay::Idle))
            }
            (PollerState::Idle, PollerEvent::Parsed(record)) => {
                (PollerState::Consuming(record), PollerAction::Inspect)
            }
            (PollerState::Idle, PollerEvent::Fault(_)) => {
                (PollerState::Idle, PollerAction::Wait(PollDelay::Fault))
            }

            (PollerState::Consuming(record), PollerEvent::Inspected) => {
                if record.activate {
                    let prompt = record.prompt;
                    (PollerState::Running(prompt.clone()), PollerAction::Run(prompt))
                } else {
                    (PollerState::Idle, PollerAction::Wait(PollDelay::Inactive))
                }
            }

            (PollerState::Running(_), PollerEvent::PipelineFinished) => {
                (PollerState::Resetting, PollerAction::Reset)
            }

            (PollerState::Resetting, PollerEvent::ResetWritten) => {
                (PollerState::Terminated, PollerAction::Exit)
            }
            (PollerState::Resetting, PollerEvent::ResetFailed(reason)) => {
                (PollerState::Terminated, PollerAction::Abort(reason))
            }

            (state, _) => (state, PollerAction::Wait(PollDelay::Fault)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(prompt: &str, activate: bool) -> TriggerRecord {
        TriggerRecord {
            prompt: prompt.to_string(),
            activate,
        }
    }

    #[test]
    fn idle_keeps_waiting_without_a_record() {
        for event in [PollerEvent::Absent, PollerEvent::Empty] {
            assert_eq!(
                PollerState::Idle.advance(event),
                (PollerState::Idle, PollerAction::Wait(PollDelay::Idle))
            );
        }
    }

    #[test]
    fn faults_stay_idle_with_fault_delay() {
        assert_eq!(
            PollerState::Idle.advance(PollerEvent::Fault("bad".to_string())),
            (PollerState::Idle, PollerAction::Wait(PollDelay::Fault))
        );
    }

    #[test]
    fn inactive_record_returns_to_idle_with_short_delay() {
        let (state, action) = PollerState::Idle.advance(PollerEvent::Parsed(record("fox", false)));
        assert_eq!(action, PollerAction::Inspect);
        assert_eq!(
            state.advance(PollerEvent::Inspected),
            (PollerState::Idle, PollerAction::Wait(PollDelay::Inactive))
        );
    }

    #[test]
    fn full_activation_cycle_ends_terminated() {
        let (state, action) = PollerState::initial();
        assert_eq!(action, PollerAction::Poll);

        let (state, _) = state.advance(PollerEvent::Parsed(record("sunset beach", true)));
        let (state, action) = state.advance(PollerEvent::Inspected);
        assert_eq!(state, PollerState::Running("sunset beach".to_string()));
        assert_eq!(action, PollerAction::Run("sunset beach".to_string()));

        let (state, action) = state.advance(PollerEvent::PipelineFinished);
        assert_eq!((state.clone(), action), (PollerState::Resetting, PollerAction::Reset));

        let (state, action) = state.advance(PollerEvent::ResetWritten);
        assert_eq!((state, action), (PollerState::Terminated, PollerAction::Exit));
    }

    #[test]
    fn failed_reset_aborts() {
        assert_eq!(
            PollerState::Resetting.advance(PollerEvent::ResetFailed("disk full".to_string())),
            (PollerState::Terminated, PollerAction::Abort("disk full".to_string()))
        );
    }

    #[test]
    fn terminated_is_absorbing() {
        assert_eq!(
            PollerState::Terminated.advance(PollerEvent::Parsed(record("fox", true))),
            (PollerState::Terminated, PollerAction::Exit)
        );
    }

    #[test]
    fn out_of_order_events_leave_state_unchanged() {
        let running = PollerState::Running("fox".to_string());
        assert_eq!(
            running.clone().advance(PollerEvent::Absent),
            (running, PollerAction::Wait(PollDelay::Fault))
        );
    }
}
