use std::{sync::Arc, time::Instant};

use agent::{AgentErr, DistributedAgent, LossFn};
use comms::{AgentState, specs::BackendSpec};
use coordinator::{Coordinator, LocalSyncCoordinator, SyncCoordinator};
use futures::future;
use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::{
    TrainingConfig, TrainingResult,
    error::{Result, TrainerErr},
};

/// Runs a set of agents against one coordinator.
///
/// The coordinator lives exactly as long as one `run`, it's closed once every agent is
/// done or as soon as the run is cancelled.
pub struct DistributedTrainer {
    config: TrainingConfig,
    loss: Arc<dyn LossFn>,
    coordinator: Option<Coordinator>,
    cancel: CancellationToken,
}

impl DistributedTrainer {
    /// Creates a new `DistributedTrainer`.
    ///
    /// # Arguments
    /// * `config` - The run's configuration, validated here.
    /// * `loss` - The loss function every agent trains against.
    ///
    /// # Returns
    /// A new trainer or `InvalidConfig`.
    pub fn new<L>(config: TrainingConfig, loss: L) -> Result<Self>
    where
        L: LossFn + 'static,
    {
        config.validate()?;

        Ok(Self {
            config,
            loss: Arc::new(loss),
            coordinator: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Provides the coordinator of a non local backend.
    ///
    /// # Arguments
    /// * `coordinator` - A coordinator matching the configured backend.
    ///
    /// # Returns
    /// The trainer or `InvalidConfig` if the coordinator doesn't match the backend.
    pub fn with_coordinator(mut self, coordinator: Coordinator) -> Result<Self> {
        let matches = matches!(
            (self.config.backend, &coordinator),
            (BackendSpec::MessagePassing, Coordinator::MessagePassing(_))
                | (BackendSpec::Cluster, Coordinator::External(_))
        );

        if !matches {
            return Err(TrainerErr::InvalidConfig(format!(
                "a {} coordinator can't back the {:?} backend",
                coordinator.kind(),
                self.config.backend
            )));
        }

        self.coordinator = Some(coordinator);
        Ok(self)
    }

    /// A handle that stops the run when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Trains every agent to completion.
    ///
    /// # Returns
    /// The run's result, or `Registration` if the coordinator refused an agent, either
    /// at registration or later on.
    pub async fn run(self) -> Result<TrainingResult> {
        let Self {
            config,
            loss,
            coordinator,
            cancel,
        } = self;

        let coordinator = match coordinator {
            Some(coordinator) => coordinator,
            None if config.backend == BackendSpec::Local => Coordinator::Local(
                LocalSyncCoordinator::new(config.barrier_policy, config.initial_weights.len()),
            ),
            None => {
                return Err(TrainerErr::InvalidConfig(format!(
                    "the {:?} backend needs a coordinator",
                    config.backend
                )));
            }
        };

        let local = match &coordinator {
            Coordinator::Local(local) => Some(local.clone()),
            _ => None,
        };

        let coordinator: Arc<dyn SyncCoordinator> = Arc::new(coordinator);
        let agent_config = config.agent_config()?;
        let start = Instant::now();

        info!(
            "starting training: agents={}, iterations={}, sync_interval={}",
            config.agent_ids.len(),
            config.iterations,
            config.sync_interval
        );

        let mut agents = Vec::with_capacity(config.agent_ids.len());

        for agent_id in &config.agent_ids {
            let state = AgentState::new(agent_id.as_str(), config.initial_weights.clone(), 0);
            let agent = DistributedAgent::new(
                state,
                coordinator.clone(),
                loss.clone(),
                agent_config.clone(),
            )
            .with_cancel_token(cancel.clone());

            if let Err(e) = agent.register().await {
                warn!("aborting the run, couldn't register agent {agent_id}: {e}");
                coordinator.close().await;

                return Err(match e {
                    AgentErr::Sync(e) => TrainerErr::Registration(e),
                    other => TrainerErr::AgentTask {
                        agent_id: agent_id.clone(),
                        detail: other.to_string(),
                    },
                });
            }

            agents.push(agent);
        }

        let watcher = {
            let coordinator = coordinator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cancel.cancelled().await;
                info!("training cancelled, closing the coordinator");
                coordinator.close().await;
            })
        };

        let handles: Vec<_> = agents
            .into_iter()
            .map(|agent| tokio::spawn(agent.run()))
            .collect();

        let joined = future::join_all(handles).await;

        watcher.abort();
        coordinator.close().await;

        let mut reports = Vec::with_capacity(joined.len());
        for (agent_id, joined) in config.agent_ids.iter().zip(joined) {
            let report = joined.map_err(|e| TrainerErr::AgentTask {
                agent_id: agent_id.clone(),
                detail: e.to_string(),
            })?;

            reports.push(report);
        }

        if let Some((agent_id, err)) = reports
            .iter()
            .find_map(|r| r.fatal.clone().map(|err| (r.agent_id.as_str(), err)))
        {
            warn!("run aborted, the coordinator refused agent {agent_id}: {err}");
            return Err(TrainerErr::Registration(err));
        }

        let history = local.map(|local| local.history()).unwrap_or_default();
        let result =
            TrainingResult::assemble(reports, &history, start.elapsed(), cancel.is_cancelled());

        info!(
            "training finished in {:?}: rounds={}, degraded={}",
            result.duration,
            result.rounds.len(),
            result.degraded_count()
        );

        Ok(result)
    }
}
