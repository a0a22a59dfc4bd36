use std::{num::NonZeroU64, time::Duration};

use comms::specs::FailurePolicy;

/// Immutable training bounds of a single agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// The amount of local steps to run.
    pub iterations: u64,
    /// Synchronize after every `sync_interval` local steps.
    pub sync_interval: NonZeroU64,
    pub learning_rate: f64,
    /// The time budget of every round, measured from its first submission.
    pub round_timeout: Duration,
    pub failure_policy: FailurePolicy,
}
