use std::{error::Error, fmt};

use comms::SyncErr;

/// The agent module's result type.
pub type Result<T> = std::result::Result<T, AgentErr>;

/// What was wrong with a loss function's output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GradientFault {
    LengthMismatch { expected: usize, got: usize },
    NonFiniteLoss(f64),
    NonFiniteGradient { index: usize },
}

impl fmt::Display for GradientFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GradientFault::LengthMismatch { expected, got } => {
                write!(f, "gradient length {got}, expected {expected}")
            }
            GradientFault::NonFiniteLoss(loss) => write!(f, "non-finite loss {loss}"),
            GradientFault::NonFiniteGradient { index } => {
                write!(f, "non-finite gradient at index {index}")
            }
        }
    }
}

/// Agent runtime failures.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentErr {
    InvalidGradient {
        agent_id: String,
        iteration: u64,
        fault: GradientFault,
    },
    Sync(SyncErr),
}

impl fmt::Display for AgentErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentErr::InvalidGradient {
                agent_id,
                iteration,
                fault,
            } => write!(
                f,
                "invalid loss output for agent {agent_id} at iteration {iteration}: {fault}"
            ),
            AgentErr::Sync(e) => write!(f, "synchronization error: {e}"),
        }
    }
}

impl Error for AgentErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AgentErr::Sync(e) => Some(e),
            _ => None,
        }
    }
}

impl From<SyncErr> for AgentErr {
    fn from(value: SyncErr) -> Self {
        Self::Sync(value)
    }
}
