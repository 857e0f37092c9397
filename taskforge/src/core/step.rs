//! The fixed, ordered pipeline step sequence.

use std::fmt;
use std::str::FromStr;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

/// Pipeline steps, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Step {
    FetchTicket,
    ValidateTicket,
    Clone,
    BuildCheatsheet,
    Execute,
    ValidateExecution,
    Ship,
    Notify,
}

impl Step {
    pub const ALL: [Step; 8] = [
        Step::FetchTicket,
        Step::ValidateTicket,
        Step::Clone,
        Step::BuildCheatsheet,
        Step::Execute,
        Step::ValidateExecution,
        Step::Ship,
        Step::Notify,
    ];

    /// Stable 1-based step number.
    pub fn number(self) -> u8 {
        match self {
            Step::FetchTicket => 1,
            Step::ValidateTicket => 2,
            Step::Clone => 3,
            Step::BuildCheatsheet => 4,
            Step::Execute => 5,
            Step::ValidateExecution => 6,
            Step::Ship => 7,
            Step::Notify => 8,
        }
    }

    /// Stable name, identical to the serialized form.
    pub fn name(self) -> &'static str {
        match self {
            Step::FetchTicket => "fetch_ticket",
            Step::ValidateTicket => "validate_ticket",
            Step::Clone => "clone",
            Step::BuildCheatsheet => "build_cheatsheet",
            Step::Execute => "execute",
            Step::ValidateExecution => "validate_execution",
            Step::Ship => "ship",
            Step::Notify => "notify",
        }
    }

    /// The following step, `None` after `Notify`.
    pub fn next(self) -> Option<Step> {
        Step::ALL.get(usize::from(self.number())).copied()
    }

    /// Steps that run once per (service, branch) target.
    pub fn is_per_target(self) -> bool {
        matches!(
            self,
            Step::Clone | Step::BuildCheatsheet | Step::Execute | Step::ValidateExecution | Step::Ship
        )
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.number(), self.name())
    }
}

impl FromStr for Step {
    type Err = anyhow::Error;

    /// Accepts the step name (`build_cheatsheet`, `build-cheatsheet`) or its number.
    fn from_str(raw: &str) -> Result<Self> {
        let wanted = raw.trim().to_ascii_lowercase().replace('-', "_");
        Step::ALL
            .into_iter()
            .find(|step| step.name() == wanted || step.number().to_string() == wanted)
            .ok_or_else(|| anyhow!("unknown step '{raw}'"))
    }
}
