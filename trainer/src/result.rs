use std::{
    collections::{BTreeMap, BTreeSet},
    time::Duration,
};

use agent::{AgentReport, AgentStatus, SyncRecord};
use comms::{Exclusion, RoundOutcome, RoundReport, SyncErr};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// What the agents of a run observed of one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u64,
    pub outcome: RoundOutcome,
    /// Agents that adopted the round's aggregate.
    pub participants: Vec<String>,
    /// Mean loss over the participants, or over every submitter if the round failed.
    pub mean_loss: f64,
    /// Agents the round was resolved without.
    pub missed: Vec<String>,
    pub excluded: Vec<Exclusion>,
    pub error: Option<SyncErr>,
}

/// The outcome of a `DistributedTrainer` run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingResult {
    pub final_weights: BTreeMap<String, Vec<f64>>,
    /// Round summaries ordered by round id.
    pub rounds: Vec<RoundSummary>,
    /// Agents that left synchronization after a local error, degraded or terminated.
    pub degraded: Vec<String>,
    /// Agents that had a submission refused for its content.
    pub excluded: Vec<String>,
    pub duration: Duration,
    pub cancelled: bool,
    pub agents: Vec<AgentReport>,
}

impl TrainingResult {
    /// Builds the result of a run out of the reports of its agents.
    ///
    /// # Arguments
    /// * `agents` - The reports of every agent, in configuration order.
    /// * `history` - The coordinator's own round reports, if it keeps any. They take
    ///   precedence over what the agents observed.
    /// * `duration` - The wall-clock duration of the run.
    /// * `cancelled` - Whether the run was cancelled.
    pub(crate) fn assemble(
        agents: Vec<AgentReport>,
        history: &[RoundReport],
        duration: Duration,
        cancelled: bool,
    ) -> Self {
        let final_weights = agents
            .iter()
            .map(|a| (a.agent_id.clone(), a.final_state.weights.clone()))
            .collect();

        let degraded = agents
            .iter()
            .filter(|a| matches!(a.status, AgentStatus::Degraded | AgentStatus::Terminated))
            .map(|a| a.agent_id.clone())
            .collect();

        let mut excluded = BTreeSet::new();
        let mut attempts: BTreeMap<u64, Vec<(&str, &SyncRecord)>> = BTreeMap::new();

        for agent in &agents {
            for record in &agent.sync_records {
                if record.error.as_ref().is_some_and(SyncErr::is_data) {
                    excluded.insert(agent.agent_id.clone());
                }

                if let Some(round) = record.round {
                    attempts
                        .entry(round)
                        .or_default()
                        .push((agent.agent_id.as_str(), record));
                }
            }
        }

        let mut rounds: Vec<RoundSummary> = attempts
            .into_iter()
            .map(|(round, attempts)| summarize(round, &attempts))
            .collect();

        for summary in &mut rounds {
            let Some(report) = history.iter().find(|r| r.round == summary.round) else {
                continue;
            };

            summary.missed = report.missed.clone();
            summary.excluded = report.excluded.clone();
            if summary.error.is_none() {
                summary.error = report.error.clone();
            }
        }

        for summary in &rounds {
            excluded.extend(summary.excluded.iter().map(|e| e.agent_id.clone()));
        }

        Self {
            final_weights,
            rounds,
            degraded,
            excluded: excluded.into_iter().collect(),
            duration,
            cancelled,
            agents,
        }
    }

    /// The mean loss of every round, in round order.
    pub fn loss_trajectory(&self) -> Vec<f64> {
        self.rounds.iter().map(|r| r.mean_loss).collect()
    }

    pub fn degraded_count(&self) -> usize {
        self.degraded.len()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

fn summarize(round: u64, attempts: &[(&str, &SyncRecord)]) -> RoundSummary {
    let participants: Vec<_> = attempts.iter().filter(|(_, r)| r.is_synced()).collect();

    let outcome = participants
        .iter()
        .find_map(|(_, r)| r.outcome)
        .unwrap_or(RoundOutcome::Failed);

    let error = attempts.iter().find_map(|(_, r)| r.error.clone());
    let adopted = participants.first().map(|(_, r)| *r);

    let losses: Vec<f64> = if participants.is_empty() {
        attempts.iter().map(|(_, r)| r.loss).collect()
    } else {
        participants.iter().map(|(_, r)| r.loss).collect()
    };

    RoundSummary {
        round,
        outcome,
        participants: participants.iter().map(|(id, _)| id.to_string()).collect(),
        mean_loss: losses.iter().sum::<f64>() / losses.len() as f64,
        missed: adopted.map(|r| r.missed.clone()).unwrap_or_default(),
        excluded: adopted.map(|r| r.excluded.clone()).unwrap_or_default(),
        error,
    }
}
