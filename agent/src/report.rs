use comms::{AgentState, Exclusion, RoundOutcome, SyncErr};
use serde::{Deserialize, Serialize};

/// Where an agent stands once it stopped training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Healthy,
    /// Excluded from synchronization after a local error, kept training locally.
    Degraded,
    /// Stopped after a local error or after the coordinator refused it.
    Terminated,
    Cancelled,
}

/// One synchronization attempt of an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncRecord {
    /// The round the state was staged for, `None` when the submission was refused.
    pub round: Option<u64>,
    /// The local step the attempt followed.
    pub step: u64,
    /// The loss of that step.
    pub loss: f64,
    pub outcome: Option<RoundOutcome>,
    /// Agents the adopted round didn't wait for.
    pub missed: Vec<String>,
    pub excluded: Vec<Exclusion>,
    pub error: Option<SyncErr>,
}

impl SyncRecord {
    /// Whether the agent adopted an aggregate in this attempt.
    pub fn is_synced(&self) -> bool {
        self.outcome.is_some()
    }
}

/// The summary a `DistributedAgent` returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentReport {
    pub agent_id: String,
    pub final_state: AgentState,
    /// Local steps taken, skipped updates included.
    pub steps: u64,
    pub status: AgentStatus,
    pub last_loss: Option<f64>,
    /// Why the agent degraded or terminated.
    pub failure: Option<String>,
    /// A registration error that stopped the agent, it aborts the whole run.
    pub fatal: Option<SyncErr>,
    pub sync_records: Vec<SyncRecord>,
}
