use serde::{Deserialize, Serialize};

use crate::{AgentState, SyncErr};

/// Handed back to an agent once it's part of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub agent_id: String,
    /// Registration order of the agent inside the session.
    pub slot: usize,
}

/// How a synchronization round was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// Every expected agent contributed.
    Success,
    /// Resolved with fewer contributors, some were missed or excluded.
    Partial,
    Failed,
}

/// Why a submitted state was left out of an aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ExclusionReason {
    DimensionMismatch { expected: usize, got: usize },
    Corrupt { index: usize },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub agent_id: String,
    pub reason: ExclusionReason,
}

/// The audit record of a resolved round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundReport {
    pub round: u64,
    pub outcome: RoundOutcome,
    /// Agents whose states were averaged, in the order they were summed.
    pub participants: Vec<String>,
    /// Agents that didn't arrive before the round timed out.
    pub missed: Vec<String>,
    pub excluded: Vec<Exclusion>,
    pub error: Option<SyncErr>,
}

/// The averaged state of a round, every participant receives the same value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub state: AgentState,
    pub report: RoundReport,
}

impl Aggregate {
    /// The round this aggregate was produced in.
    pub fn round(&self) -> u64 {
        self.report.round
    }
}
