mod aggregate;
mod session;

use std::{sync::Arc, time::Duration};

use comms::{Aggregate, AgentState, Receipt, RoundReport, SyncErr, specs::BarrierPolicy};
use log::{debug, info};
use parking_lot::Mutex;
use tokio::time;

use crate::{Result, SyncCoordinator};
use session::{ReleaseRx, Resolution, Session};

/// An in-process coordinator, agents share it through clones.
///
/// Submissions are staged in an arrival table and the last arrival of a round (or its
/// deadline) averages them, every waiter of the round is then released with the same
/// `Arc<Aggregate>`.
#[derive(Clone)]
pub struct LocalSyncCoordinator {
    session: Arc<Mutex<Session>>,
}

impl LocalSyncCoordinator {
    /// Creates a new `LocalSyncCoordinator`.
    ///
    /// # Arguments
    /// * `policy` - What to do with rounds that time out or receive a mismatched state.
    /// * `dimension` - The weight dimensionality every submission must have.
    ///
    /// # Returns
    /// A new `LocalSyncCoordinator` instance.
    pub fn new(policy: BarrierPolicy, dimension: usize) -> Self {
        Self {
            session: Arc::new(Mutex::new(Session::new(policy, dimension))),
        }
    }

    /// The reports of every resolved round, oldest first.
    pub fn history(&self) -> Vec<RoundReport> {
        self.session.lock().history()
    }

    /// The id of the round currently collecting submissions.
    pub fn current_round(&self) -> u64 {
        self.session.lock().round()
    }

    async fn released(rx: &mut ReleaseRx) -> Resolution {
        match rx.wait_for(Option::is_some).await {
            Ok(resolution) => (*resolution).clone().unwrap_or(Err(SyncErr::Cancelled)),
            Err(_) => Err(SyncErr::Cancelled),
        }
    }
}

#[async_trait::async_trait]
impl SyncCoordinator for LocalSyncCoordinator {
    async fn register(&self, agent_id: &str) -> Result<Receipt> {
        self.session.lock().register(agent_id)
    }

    async fn submit(&self, agent_id: &str, state: AgentState) -> Result<u64> {
        self.session.lock().submit(agent_id, state)
    }

    async fn barrier(&self, agent_id: &str, timeout: Duration) -> Result<Arc<Aggregate>> {
        let (round, started_at, mut rx) = self.session.lock().enter(agent_id)?;

        match time::timeout_at(started_at + timeout, Self::released(&mut rx)).await {
            Ok(resolution) => resolution,
            Err(_) => {
                debug!(round = round; "barrier deadline reached by {agent_id}");
                self.session.lock().expire(round);
                Self::released(&mut rx).await
            }
        }
    }

    async fn withdraw(&self, agent_id: &str) -> Result<()> {
        self.session.lock().withdraw(agent_id)
    }

    async fn close(&self) {
        let closed = self.session.lock().close();

        if closed {
            info!("local coordinator closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_clones_share_one_session() {
        let coordinator = LocalSyncCoordinator::new(BarrierPolicy::FailRound, 1);
        let other = coordinator.clone();

        coordinator.register("a").await.unwrap();
        let err = other.register("a").await.unwrap_err();

        assert_eq!(err, SyncErr::DuplicateAgent { agent_id: "a".into() });
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_barrier_releases_every_waiter_with_the_same_aggregate() {
        let coordinator = LocalSyncCoordinator::new(BarrierPolicy::FailRound, 2);
        coordinator.register("a").await.unwrap();
        coordinator.register("b").await.unwrap();

        coordinator
            .submit("a", AgentState::new("a", vec![1., 1.], 1))
            .await
            .unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.barrier("a", Duration::from_secs(5)).await })
        };

        coordinator
            .submit("b", AgentState::new("b", vec![3., 3.], 1))
            .await
            .unwrap();

        let b = coordinator.barrier("b", Duration::from_secs(5)).await.unwrap();
        let a = waiter.await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.state.weights, vec![2., 2.]);
        assert_eq!(coordinator.current_round(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_releases_blocked_barrier() {
        let coordinator = LocalSyncCoordinator::new(BarrierPolicy::PartialRound, 1);
        coordinator.register("a").await.unwrap();
        coordinator.register("b").await.unwrap();

        coordinator
            .submit("a", AgentState::new("a", vec![1.], 1))
            .await
            .unwrap();

        let waiter = {
            let coordinator = coordinator.clone();
            tokio::spawn(async move { coordinator.barrier("a", Duration::from_secs(60)).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.close().await;
        coordinator.close().await;

        let err = waiter.await.unwrap().unwrap_err();
        assert_eq!(err, SyncErr::Cancelled);
    }
}
