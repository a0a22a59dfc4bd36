use std::sync::Arc;

use comms::{AgentState, Receipt, SyncErr, specs::FailurePolicy};
use coordinator::SyncCoordinator;
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    AgentConfig, AgentReport, AgentStatus, LossFn, SyncRecord,
    error::{AgentErr, GradientFault, Result},
};

/// A training agent that periodically averages its weights with its peers.
pub struct DistributedAgent {
    state: AgentState,
    coordinator: Arc<dyn SyncCoordinator>,
    loss: Arc<dyn LossFn>,
    config: AgentConfig,
    cancel: CancellationToken,
    status: AgentStatus,
    records: Vec<SyncRecord>,
    fatal: Option<SyncErr>,
}

impl DistributedAgent {
    /// Creates a new `DistributedAgent`.
    ///
    /// # Arguments
    /// * `state` - The starting state, it also names the agent.
    /// * `coordinator` - The coordinator shared by every agent of the run.
    /// * `loss` - The loss function to train against.
    /// * `config` - The agent's training bounds.
    ///
    /// # Returns
    /// A new `DistributedAgent` instance.
    pub fn new(
        state: AgentState,
        coordinator: Arc<dyn SyncCoordinator>,
        loss: Arc<dyn LossFn>,
        config: AgentConfig,
    ) -> Self {
        Self {
            state,
            coordinator,
            loss,
            config,
            cancel: CancellationToken::new(),
            status: AgentStatus::Healthy,
            records: Vec::new(),
            fatal: None,
        }
    }

    /// Stops the agent at its next step boundary once `token` is cancelled.
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn agent_id(&self) -> &str {
        &self.state.agent_id
    }

    /// Registers the agent with its coordinator, must happen before the first round.
    pub async fn register(&self) -> Result<Receipt> {
        let receipt = self.coordinator.register(self.agent_id()).await?;
        debug!(slot = receipt.slot; "agent {} registered", receipt.agent_id);
        Ok(receipt)
    }

    /// Runs the agent until its iteration budget is exhausted.
    ///
    /// Local errors never abort the run: depending on the failure policy the agent either
    /// keeps training locally without synchronizing or stops early, in both cases the
    /// report says so.
    ///
    /// # Returns
    /// The agent's final state together with its synchronization history.
    pub async fn run(mut self) -> AgentReport {
        let agent_id = self.state.agent_id.clone();
        let interval = self.config.sync_interval.get();

        let mut steps = 0;
        let mut last_loss = None;
        let mut failure = None;

        info!(
            "agent {agent_id} starting: iterations={}, sync_interval={interval}",
            self.config.iterations
        );

        while steps < self.config.iterations {
            if self.cancel.is_cancelled() {
                info!("agent {agent_id} cancelled at step {steps}");
                self.status = AgentStatus::Cancelled;
                break;
            }

            let step = self.step();
            steps += 1;

            let loss = match step {
                Ok(loss) => loss,
                Err(e) => {
                    warn!("agent {agent_id} failed a step: {e}");
                    failure = Some(e.to_string());

                    if self.config.failure_policy == FailurePolicy::Strict {
                        self.status = AgentStatus::Terminated;
                        break;
                    }

                    self.degrade().await;
                    continue;
                }
            };

            last_loss = Some(loss);

            if self.status == AgentStatus::Healthy && steps % interval == 0 {
                self.sync(steps, loss).await;
            }

            if self.fatal.is_some() {
                self.status = AgentStatus::Terminated;
                break;
            }
        }

        if let Err(e) = self.coordinator.withdraw(&agent_id).await {
            debug!("agent {agent_id} couldn't withdraw: {e}");
        }

        info!(
            "agent {agent_id} finished: steps={steps}, status={:?}",
            self.status
        );

        AgentReport {
            agent_id,
            final_state: self.state,
            steps,
            status: self.status,
            last_loss,
            failure,
            fatal: self.fatal,
            sync_records: self.records,
        }
    }

    /// Runs one local update.
    ///
    /// # Returns
    /// The loss before the update, or why the update was skipped.
    fn step(&mut self) -> Result<f64> {
        let (loss, gradient) = self.loss.evaluate(&self.state.weights, self.state.iteration);
        self.validate(loss, &gradient)?;

        let lr = self.config.learning_rate;
        let weights = self
            .state
            .weights
            .iter()
            .zip(&gradient)
            .map(|(w, g)| w - lr * g)
            .collect();

        self.state = self.state.successor(weights);
        Ok(loss)
    }

    fn validate(&self, loss: f64, gradient: &[f64]) -> Result<()> {
        let fault = if gradient.len() != self.state.dimension() {
            Some(GradientFault::LengthMismatch {
                expected: self.state.dimension(),
                got: gradient.len(),
            })
        } else if !loss.is_finite() {
            Some(GradientFault::NonFiniteLoss(loss))
        } else {
            gradient
                .iter()
                .position(|g| !g.is_finite())
                .map(|index| GradientFault::NonFiniteGradient { index })
        };

        match fault {
            None => Ok(()),
            Some(fault) => Err(AgentErr::InvalidGradient {
                agent_id: self.state.agent_id.clone(),
                iteration: self.state.iteration,
                fault,
            }),
        }
    }

    /// Submits the current state and takes over the round's aggregate.
    ///
    /// A failed round leaves the local weights untouched.
    async fn sync(&mut self, step: u64, loss: f64) {
        let agent_id = self.state.agent_id.clone();

        let mut record = SyncRecord {
            round: None,
            step,
            loss,
            outcome: None,
            missed: Vec::new(),
            excluded: Vec::new(),
            error: None,
        };

        match self.coordinator.submit(&agent_id, self.state.clone()).await {
            Ok(round) => record.round = Some(round),
            Err(e) => {
                warn!("agent {agent_id} couldn't submit at step {step}: {e}");

                let data_error = e.is_data();
                self.refused(&e);
                record.error = Some(e);
                self.records.push(record);

                if data_error {
                    self.degrade().await;
                }
                return;
            }
        }

        match self.coordinator.barrier(&agent_id, self.config.round_timeout).await {
            Ok(aggregate) => {
                debug!(round = aggregate.round(); "agent {agent_id} adopted the aggregate");
                self.state = self.state.adopt(&aggregate.state);
                record.outcome = Some(aggregate.report.outcome);
                record.missed = aggregate.report.missed.clone();
                record.excluded = aggregate.report.excluded.clone();
            }
            Err(e) => {
                warn!("agent {agent_id} keeps its local weights after step {step}: {e}");
                self.refused(&e);
                record.error = Some(e);
            }
        }

        self.records.push(record);
    }

    /// Stops the whole run if the coordinator doesn't know this agent.
    fn refused(&mut self, e: &SyncErr) {
        if !e.is_registration() {
            return;
        }

        warn!("agent {} was refused by the coordinator, aborting the run", self.state.agent_id);
        self.fatal = Some(e.clone());
        self.cancel.cancel();
    }

    /// Leaves synchronization for good, training goes on locally.
    async fn degrade(&mut self) {
        if self.status != AgentStatus::Healthy {
            return;
        }

        let agent_id = &self.state.agent_id;
        self.status = AgentStatus::Degraded;
        warn!("agent {agent_id} degraded, continuing without synchronization");

        if let Err(e) = self.coordinator.withdraw(agent_id).await {
            debug!("agent {agent_id} couldn't withdraw: {e}");
        }
    }
}
