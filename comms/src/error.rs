use std::{
    error::Error,
    fmt::{self, Display},
};

use serde::{Deserialize, Serialize};

/// The synchronization failures every coordinator backend reports.
///
/// It travels inside `Error` messages, so every variant must stay serializable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SyncErr {
    DuplicateAgent {
        agent_id: String,
    },
    UnknownAgent {
        agent_id: String,
    },
    RegistrationClosed {
        agent_id: String,
    },
    SequenceRegression {
        agent_id: String,
        last: u64,
        got: u64,
    },
    AlreadySubmitted {
        agent_id: String,
        round: u64,
    },
    NotSubmitted {
        agent_id: String,
    },
    Withdrawn {
        agent_id: String,
    },
    DimensionMismatch {
        agent_id: String,
        expected: usize,
        got: usize,
    },
    Corrupt {
        agent_id: String,
        index: usize,
    },
    BarrierTimeout {
        round: u64,
    },
    NoContributions {
        round: u64,
    },
    Cancelled,
    Transport {
        detail: String,
    },
}

impl SyncErr {
    /// Whether this error points at a broken agent set, those abort a run.
    pub fn is_registration(&self) -> bool {
        matches!(
            self,
            Self::DuplicateAgent { .. }
                | Self::UnknownAgent { .. }
                | Self::RegistrationClosed { .. }
        )
    }

    /// Whether this error is local to the data a single agent submitted.
    pub fn is_data(&self) -> bool {
        matches!(
            self,
            Self::DimensionMismatch { .. } | Self::Corrupt { .. }
        )
    }

    /// Creates a `Transport` error out of anything displayable.
    pub fn transport(detail: impl Display) -> Self {
        Self::Transport {
            detail: detail.to_string(),
        }
    }
}

impl Display for SyncErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateAgent { agent_id } => {
                write!(f, "agent {agent_id} is already registered")
            }
            Self::UnknownAgent { agent_id } => write!(f, "agent {agent_id} is not registered"),
            Self::RegistrationClosed { agent_id } => write!(
                f,
                "can't register agent {agent_id}, the first round already started"
            ),
            Self::SequenceRegression {
                agent_id,
                last,
                got,
            } => write!(
                f,
                "sequence regression from agent {agent_id}: got {got}, last seen {last}"
            ),
            Self::AlreadySubmitted { agent_id, round } => {
                write!(f, "agent {agent_id} already submitted for round {round}")
            }
            Self::NotSubmitted { agent_id } => {
                write!(f, "agent {agent_id} entered the barrier without submitting")
            }
            Self::Withdrawn { agent_id } => {
                write!(f, "agent {agent_id} withdrew from synchronization")
            }
            Self::DimensionMismatch {
                agent_id,
                expected,
                got,
            } => write!(
                f,
                "dimension mismatch from agent {agent_id}: got {got}, expected {expected}"
            ),
            Self::Corrupt { agent_id, index } => {
                write!(f, "agent {agent_id} submitted a non-finite weight at index {index}")
            }
            Self::BarrierTimeout { round } => write!(f, "barrier timed out in round {round}"),
            Self::NoContributions { round } => {
                write!(f, "round {round} resolved without any valid contribution")
            }
            Self::Cancelled => f.write_str("synchronization was cancelled"),
            Self::Transport { detail } => write!(f, "transport error: {detail}"),
        }
    }
}

impl Error for SyncErr {}
