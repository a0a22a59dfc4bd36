use serde::{Deserialize, Serialize};

/// What a coordinator does with a round once its timeout elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPolicy {
    /// Every blocked caller gets `BarrierTimeout` and the round is discarded.
    FailRound,
    /// The round is averaged over the agents that arrived in time.
    PartialRound,
}

/// The transport backing a training run's coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendSpec {
    Local,
    MessagePassing,
    Cluster,
}

/// What an agent does after its loss function produced an invalid output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Keep training locally without synchronizing.
    Lenient,
    /// Stop training.
    Strict,
}
