use std::{collections::BTreeMap, mem, sync::Arc};

use comms::{
    Aggregate, AgentState, Exclusion, ExclusionReason, Receipt, RoundOutcome, RoundReport,
    SyncErr, specs::BarrierPolicy,
};
use log::{debug, info, warn};
use tokio::{sync::watch, time::Instant};

use super::aggregate;
use crate::Result;

/// The id every aggregated state is published under.
pub(super) const AGGREGATE_ID: &str = "aggregate";

pub(super) type Resolution = Result<Arc<Aggregate>>;
pub(super) type ReleaseRx = watch::Receiver<Option<Resolution>>;

/// Why a round is being resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Complete,
    Timeout,
    Cancelled,
}

/// Per agent bookkeeping.
#[derive(Debug, Default)]
struct Slot {
    index: usize,
    staged: Option<AgentState>,
    last_sequence: Option<u64>,
    arrived: bool,
    withdrawn: bool,
    /// The release of the round the agent last submitted to, taken by its barrier call.
    pending: Option<(u64, ReleaseRx)>,
}

/// The round currently collecting submissions.
struct Round {
    id: u64,
    started_at: Option<Instant>,
    excluded: Vec<Exclusion>,
    /// Set when the round can only fail, whatever arrives later.
    poisoned: Option<SyncErr>,
    release: watch::Sender<Option<Resolution>>,
}

impl Round {
    fn new(id: u64) -> Self {
        let (release, _) = watch::channel(None);

        Self {
            id,
            started_at: None,
            excluded: Vec::new(),
            poisoned: None,
            release,
        }
    }
}

/// The arrival table of a `LocalSyncCoordinator`.
///
/// Every method runs under the coordinator's lock and never blocks, a round is resolved
/// at most once and its resolution is published to all of its waiters at the same time.
pub(super) struct Session {
    policy: BarrierPolicy,
    dimension: usize,
    slots: BTreeMap<String, Slot>,
    round: Round,
    sealed: bool,
    closed: bool,
    history: Vec<RoundReport>,
}

impl Session {
    pub(super) fn new(policy: BarrierPolicy, dimension: usize) -> Self {
        Self {
            policy,
            dimension,
            slots: BTreeMap::new(),
            round: Round::new(0),
            sealed: false,
            closed: false,
            history: Vec::new(),
        }
    }

    pub(super) fn register(&mut self, agent_id: &str) -> Result<Receipt> {
        if self.closed {
            return Err(SyncErr::Cancelled);
        }

        if self.slots.contains_key(agent_id) {
            return Err(SyncErr::DuplicateAgent {
                agent_id: agent_id.to_string(),
            });
        }

        if self.sealed {
            return Err(SyncErr::RegistrationClosed {
                agent_id: agent_id.to_string(),
            });
        }

        let index = self.slots.len();
        let slot = Slot {
            index,
            ..Default::default()
        };

        self.slots.insert(agent_id.to_string(), slot);
        debug!(slot = index; "registered agent {agent_id}");

        Ok(Receipt {
            agent_id: agent_id.to_string(),
            slot: index,
        })
    }

    pub(super) fn submit(&mut self, agent_id: &str, state: AgentState) -> Result<u64> {
        if self.closed {
            return Err(SyncErr::Cancelled);
        }

        if state.agent_id != agent_id {
            return Err(SyncErr::UnknownAgent {
                agent_id: state.agent_id,
            });
        }

        let round_id = self.round.id;
        let slot = self
            .slots
            .get_mut(agent_id)
            .ok_or_else(|| SyncErr::UnknownAgent {
                agent_id: agent_id.to_string(),
            })?;

        if slot.withdrawn {
            return Err(SyncErr::Withdrawn {
                agent_id: agent_id.to_string(),
            });
        }

        if slot.arrived {
            return Err(SyncErr::AlreadySubmitted {
                agent_id: agent_id.to_string(),
                round: round_id,
            });
        }

        if let Some(last) = slot.last_sequence {
            if state.iteration <= last {
                return Err(SyncErr::SequenceRegression {
                    agent_id: agent_id.to_string(),
                    last,
                    got: state.iteration,
                });
            }
        }

        slot.last_sequence = Some(state.iteration);
        slot.arrived = true;

        let verdict = if state.dimension() != self.dimension {
            Some(ExclusionReason::DimensionMismatch {
                expected: self.dimension,
                got: state.dimension(),
            })
        } else {
            state
                .first_non_finite()
                .map(|index| ExclusionReason::Corrupt { index })
        };

        match verdict {
            None => {
                slot.staged = Some(state);
                slot.pending = Some((round_id, self.round.release.subscribe()));
                self.start_round();
                debug!(round = round_id; "agent {agent_id} submitted");
                self.try_complete();
                Ok(round_id)
            }
            Some(reason) => {
                let err = match reason {
                    ExclusionReason::DimensionMismatch { expected, got } => {
                        SyncErr::DimensionMismatch {
                            agent_id: agent_id.to_string(),
                            expected,
                            got,
                        }
                    }
                    ExclusionReason::Corrupt { index } => SyncErr::Corrupt {
                        agent_id: agent_id.to_string(),
                        index,
                    },
                };

                warn!("excluding agent {agent_id} from round {round_id}: {err}");

                let fails_round = matches!(reason, ExclusionReason::DimensionMismatch { .. })
                    && self.policy == BarrierPolicy::FailRound;

                if fails_round && self.round.poisoned.is_none() {
                    self.round.poisoned = Some(err.clone());
                }

                self.round.excluded.push(Exclusion {
                    agent_id: agent_id.to_string(),
                    reason,
                });

                self.start_round();
                self.try_complete();
                Err(err)
            }
        }
    }

    /// Takes the release handle of the round the agent submitted to.
    ///
    /// # Returns
    /// The round id, the instant that round started and its release receiver.
    pub(super) fn enter(&mut self, agent_id: &str) -> Result<(u64, Instant, ReleaseRx)> {
        let closed = self.closed;
        let slot = self.slot_mut(agent_id)?;

        let Some((round_id, rx)) = slot.pending.take() else {
            if closed {
                return Err(SyncErr::Cancelled);
            }

            return Err(SyncErr::NotSubmitted {
                agent_id: agent_id.to_string(),
            });
        };

        let started_at = match self.round.started_at {
            Some(started_at) if self.round.id == round_id => started_at,
            _ => Instant::now(),
        };

        Ok((round_id, started_at, rx))
    }

    pub(super) fn withdraw(&mut self, agent_id: &str) -> Result<()> {
        let slot = self.slot_mut(agent_id)?;

        if slot.withdrawn {
            return Ok(());
        }

        slot.withdrawn = true;
        info!("agent {agent_id} withdrew from synchronization");

        if !self.closed {
            self.try_complete();
        }

        Ok(())
    }

    /// Resolves the round `round_id` as timed out if it's still collecting submissions.
    pub(super) fn expire(&mut self, round_id: u64) {
        if self.round.id == round_id && self.round.started_at.is_some() {
            self.resolve(Cause::Timeout);
        }
    }

    /// Cancels the pending round and refuses every later call.
    ///
    /// # Returns
    /// Whether this call was the one closing the session.
    pub(super) fn close(&mut self) -> bool {
        if self.closed {
            return false;
        }

        self.closed = true;

        if self.round.started_at.is_some() {
            self.resolve(Cause::Cancelled);
        } else {
            self.round.release.send_replace(Some(Err(SyncErr::Cancelled)));
        }

        true
    }

    pub(super) fn round(&self) -> u64 {
        self.round.id
    }

    pub(super) fn history(&self) -> Vec<RoundReport> {
        self.history.clone()
    }

    fn slot_mut(&mut self, agent_id: &str) -> Result<&mut Slot> {
        self.slots
            .get_mut(agent_id)
            .ok_or_else(|| SyncErr::UnknownAgent {
                agent_id: agent_id.to_string(),
            })
    }

    fn start_round(&mut self) {
        self.sealed = true;
        self.round.started_at.get_or_insert_with(Instant::now);
    }

    fn try_complete(&mut self) {
        let started = self.round.started_at.is_some();

        if started && self.slots.values().all(|s| s.arrived || s.withdrawn) {
            self.resolve(Cause::Complete);
        }
    }

    fn resolve(&mut self, cause: Cause) {
        let next = Round::new(self.round.id + 1);
        let round = mem::replace(&mut self.round, next);

        let mut contributions = Vec::new();
        let mut missed = Vec::new();

        for (agent_id, slot) in self.slots.iter_mut() {
            if let Some(state) = slot.staged.take() {
                contributions.push(state);
            } else if !slot.arrived && !slot.withdrawn {
                missed.push(agent_id.clone());
            }

            slot.arrived = false;
        }

        let error = if cause == Cause::Cancelled {
            Some(SyncErr::Cancelled)
        } else if round.poisoned.is_some() {
            round.poisoned.clone()
        } else if cause == Cause::Timeout
            && (self.policy == BarrierPolicy::FailRound || contributions.is_empty())
        {
            Some(SyncErr::BarrierTimeout { round: round.id })
        } else if contributions.is_empty() {
            Some(SyncErr::NoContributions { round: round.id })
        } else {
            None
        };

        let outcome = match error {
            Some(_) => RoundOutcome::Failed,
            None if missed.is_empty() && round.excluded.is_empty() => RoundOutcome::Success,
            None => RoundOutcome::Partial,
        };

        let report = RoundReport {
            round: round.id,
            outcome,
            participants: contributions.iter().map(|s| s.agent_id.clone()).collect(),
            missed,
            excluded: round.excluded,
            error: error.clone(),
        };

        let resolution = match error {
            Some(err) => {
                warn!("round {} failed: {err}", round.id);
                Err(err)
            }
            None => {
                let vectors: Vec<&[f64]> =
                    contributions.iter().map(|s| s.weights.as_slice()).collect();
                let weights = aggregate::mean(&vectors, self.dimension);

                let iteration = contributions
                    .iter()
                    .map(|s| s.iteration)
                    .max()
                    .unwrap_or_default()
                    + 1;

                let state = AgentState::new(AGGREGATE_ID, weights, iteration)
                    .with_metadata("round", round.id)
                    .with_metadata("participants", contributions.len());

                info!(
                    round = round.id, participants = contributions.len();
                    "round resolved as {outcome:?}"
                );

                Ok(Arc::new(Aggregate {
                    state,
                    report: report.clone(),
                }))
            }
        };

        self.history.push(report);
        round.release.send_replace(Some(resolution));
    }
}
