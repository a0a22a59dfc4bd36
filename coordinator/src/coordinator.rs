use std::{sync::Arc, time::Duration};

use comms::{Aggregate, AgentState, Receipt};

use crate::{LocalSyncCoordinator, MessagePassingCoordinator, Result};

/// The capabilities a training run needs from a synchronization backend.
///
/// Whatever the backend, every participant of a resolved round must observe the same
/// aggregate, and a barrier that can't resolve in time must fail with `BarrierTimeout`
/// instead of hanging.
#[async_trait::async_trait]
pub trait SyncCoordinator: Send + Sync {
    /// Adds an agent to the session, only allowed before the first round starts.
    ///
    /// # Arguments
    /// * `agent_id` - The identifier of the new agent.
    ///
    /// # Returns
    /// A receipt or `DuplicateAgent` if the id is already taken.
    async fn register(&self, agent_id: &str) -> Result<Receipt>;

    /// Stages an agent's state for the current round without blocking.
    ///
    /// # Arguments
    /// * `agent_id` - The submitting agent.
    /// * `state` - The state to contribute, owned by `agent_id`.
    ///
    /// # Returns
    /// The round the state was staged for, or why it was refused.
    async fn submit(&self, agent_id: &str, state: AgentState) -> Result<u64>;

    /// Waits until the round the agent submitted to resolves.
    ///
    /// # Arguments
    /// * `agent_id` - The waiting agent.
    /// * `timeout` - The round's time budget, measured from its first submission.
    ///
    /// # Returns
    /// The round's aggregate, shared by every participant, or why the round failed.
    async fn barrier(&self, agent_id: &str, timeout: Duration) -> Result<Arc<Aggregate>>;

    /// Stops waiting for an agent in later rounds, it stays registered.
    async fn withdraw(&self, agent_id: &str) -> Result<()>;

    /// Releases every blocked caller with `Cancelled` and refuses further work.
    ///
    /// Calling it more than once has no further effect.
    async fn close(&self);
}

/// The backend variants a run can be configured with.
pub enum Coordinator {
    Local(LocalSyncCoordinator),
    MessagePassing(MessagePassingCoordinator),
    /// A backend provided by the caller, e.g. a cluster data-processing engine.
    External(Arc<dyn SyncCoordinator>),
}

impl Coordinator {
    /// A stable name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local(_) => "local",
            Self::MessagePassing(_) => "message_passing",
            Self::External(_) => "external",
        }
    }
}

#[async_trait::async_trait]
impl SyncCoordinator for Coordinator {
    async fn register(&self, agent_id: &str) -> Result<Receipt> {
        match self {
            Self::Local(c) => c.register(agent_id).await,
            Self::MessagePassing(c) => c.register(agent_id).await,
            Self::External(c) => c.register(agent_id).await,
        }
    }

    async fn submit(&self, agent_id: &str, state: AgentState) -> Result<u64> {
        match self {
            Self::Local(c) => c.submit(agent_id, state).await,
            Self::MessagePassing(c) => c.submit(agent_id, state).await,
            Self::External(c) => c.submit(agent_id, state).await,
        }
    }

    async fn barrier(&self, agent_id: &str, timeout: Duration) -> Result<Arc<Aggregate>> {
        match self {
            Self::Local(c) => c.barrier(agent_id, timeout).await,
            Self::MessagePassing(c) => c.barrier(agent_id, timeout).await,
            Self::External(c) => c.barrier(agent_id, timeout).await,
        }
    }

    async fn withdraw(&self, agent_id: &str) -> Result<()> {
        match self {
            Self::Local(c) => c.withdraw(agent_id).await,
            Self::MessagePassing(c) => c.withdraw(agent_id).await,
            Self::External(c) => c.withdraw(agent_id).await,
        }
    }

    async fn close(&self) {
        match self {
            Self::Local(c) => c.close().await,
            Self::MessagePassing(c) => c.close().await,
            Self::External(c) => c.close().await,
        }
    }
}
