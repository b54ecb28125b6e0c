mod machine;
mod poller;
mod store;

pub use machine::{PollDelay, PollerAction, PollerEvent, PollerState};
pub use poller::{PipelineRunner, PollerExit, TriggerPoller};
pub use store::{FileTriggerStore, TriggerReading, TriggerStore};
#[cfg(test)]
pub use store::MemoryTriggerStore;

use std::fmt;

use crate::errors::{PipelineError, Result};

/// Contents of the trigger file: `<prompt>,<status>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRecord {
    pub prompt: String,
    pub activate: bool,
}

impl TriggerRecord {
    pub fn deactivated() -> Self {
        Self {
            prompt: String::new(),
            activate: false,
        }
    }

    /// Exactly two comma-separated fields. Only a case-insensitive `true`
    /// status activates; anything else reads as idle.
    pub fn parse(raw: &str) -> Result<Self> {
        let fields: Vec<&str> = raw.trim().split(',').collect();
        let [prompt, status] = fields.as_slice() else {
            return Err(PipelineError::TriggerMalformed(format!(
                "expected 2 comma-separated fields, found {}",
                fields.len()
            )));
        };

        Ok(Self {
            prompt: prompt.trim().to_string(),
            activate: status.trim().eq_ignore_ascii_case("true"),
        })
    }
}

impl fmt::Display for TriggerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.activate { "True" } else { "False" };
        write!(f, "{},{}", self.prompt, status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activation_is_case_insensitive() {
        for raw in ["sunset beach,true", "sunset beach, TRUE ", " sunset beach ,True\n"] {
            let record = TriggerRecord::parse(raw).unwrap();
            assert_eq!(record.prompt, "sunset beach");
            assert!(record.activate);
        }
    }

    #[test]
    fn other_statuses_are_idle() {
        for raw in ["sunset beach,false", "False,False", "x,yes", "x,"] {
            assert!(!TriggerRecord::parse(raw).unwrap().activate);
        }
    }

    #[test]
    fn wrong_field_count_is_malformed() {
        for raw in ["just a prompt", "a,b,true", ""] {
            assert!(matches!(
                TriggerRecord::parse(raw),
                Err(PipelineError::TriggerMalformed(_))
            ));
        }
    }

    #[test]
    fn deactivated_record_round_trips_as_idle() {
        let written = TriggerRecord::deactivated().to_string();
        assert_eq!(written, ",False");
        assert_eq!(TriggerRecord::parse(&written).unwrap(), TriggerRecord::deactivated());
    }
}
