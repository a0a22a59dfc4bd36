use std::{sync::Arc, time::Duration};

use coordinator::{
    AgentState, BarrierPolicy, LocalSyncCoordinator, RoundOutcome, SyncCoordinator, SyncErr,
};
use rand::seq::SliceRandom;
use tokio::task::JoinSet;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn coordinator(
    ids: &[&str],
    policy: BarrierPolicy,
    dimension: usize,
) -> LocalSyncCoordinator {
    let _ = env_logger::builder().is_test(true).try_init();

    let coordinator = LocalSyncCoordinator::new(policy, dimension);
    for id in ids {
        coordinator.register(id).await.unwrap();
    }
    coordinator
}

/// Submits every state from its own task and waits at the barrier.
async fn run_round(
    coordinator: &LocalSyncCoordinator,
    states: Vec<AgentState>,
    timeout: Duration,
) -> Vec<(String, coordinator::Result<Arc<coordinator::Aggregate>>)> {
    let mut tasks = JoinSet::new();

    for state in states {
        let coordinator = coordinator.clone();
        tasks.spawn(async move {
            let id = state.agent_id.clone();
            coordinator.submit(&id, state).await.unwrap();
            let result = coordinator.barrier(&id, timeout).await;
            (id, result)
        });
    }

    let mut results = tasks.join_all().await;
    results.sort_by(|a, b| a.0.cmp(&b.0));
    results
}

#[tokio::test(flavor = "multi_thread")]
async fn every_agent_receives_the_mean() {
    let coordinator = coordinator(&["a", "b", "c"], BarrierPolicy::FailRound, 2).await;

    let states = vec![
        AgentState::new("a", vec![1., 1.], 1),
        AgentState::new("b", vec![3., 3.], 1),
        AgentState::new("c", vec![2., 2.], 1),
    ];

    let results = run_round(&coordinator, states, TIMEOUT).await;

    let first = results[0].1.as_ref().unwrap().clone();
    assert_eq!(first.state.weights, vec![2., 2.]);
    assert_eq!(first.report.outcome, RoundOutcome::Success);

    for (_, result) in &results {
        assert!(Arc::ptr_eq(result.as_ref().unwrap(), &first));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn partial_round_marks_the_late_agent_for_that_round_only() {
    let coordinator = coordinator(&["a", "b", "c"], BarrierPolicy::PartialRound, 2).await;

    let states = vec![
        AgentState::new("a", vec![1., 4.], 1),
        AgentState::new("b", vec![3., 8.], 1),
    ];

    let results = run_round(&coordinator, states, Duration::from_millis(150)).await;

    for (_, result) in &results {
        let aggregate = result.as_ref().unwrap();
        assert_eq!(aggregate.state.weights, vec![2., 6.]);
        assert_eq!(aggregate.report.outcome, RoundOutcome::Partial);
        assert_eq!(aggregate.report.missed, vec!["c"]);
    }

    let states = vec![
        AgentState::new("a", vec![1., 1.], 2),
        AgentState::new("b", vec![1., 1.], 2),
        AgentState::new("c", vec![4., 4.], 1),
    ];

    let results = run_round(&coordinator, states, TIMEOUT).await;
    let aggregate = results[2].1.as_ref().unwrap();

    assert_eq!(aggregate.round(), 1);
    assert_eq!(aggregate.state.weights, vec![2., 2.]);
    assert_eq!(aggregate.report.outcome, RoundOutcome::Success);
    assert_eq!(aggregate.report.participants, vec!["a", "b", "c"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn fail_round_times_out_every_waiter() {
    let coordinator = coordinator(&["a", "b", "c"], BarrierPolicy::FailRound, 1).await;

    let states = vec![
        AgentState::new("a", vec![1.], 1),
        AgentState::new("b", vec![2.], 1),
    ];

    let results = run_round(&coordinator, states, Duration::from_millis(100)).await;

    for (_, result) in results {
        assert_eq!(result.unwrap_err(), SyncErr::BarrierTimeout { round: 0 });
    }

    let history = coordinator.history();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].outcome, RoundOutcome::Failed);
    assert_eq!(history[0].missed, vec!["c"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn aggregate_is_the_sum_over_the_participant_count() {
    let coordinator = coordinator(&["a", "b", "c"], BarrierPolicy::FailRound, 1).await;

    let states = vec![
        AgentState::new("c", vec![0.7], 1),
        AgentState::new("b", vec![0.2], 1),
        AgentState::new("a", vec![0.1], 1),
    ];

    let results = run_round(&coordinator, states, TIMEOUT).await;

    let expected = (0.1 + 0.2 + 0.7) / 3.0;
    for (_, result) in &results {
        assert_eq!(result.as_ref().unwrap().state.weights, vec![expected]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn submission_order_does_not_change_the_aggregate() {
    let ids = ["a", "b", "c", "d", "e", "f"];
    let states: Vec<AgentState> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| {
            let i = i as f64;
            AgentState::new(*id, vec![0.1 * i, 1.0 / (i + 3.0), 1e-3 * i * i], 1)
        })
        .collect();

    let mut outputs = Vec::new();

    for _ in 0..4 {
        let coordinator = coordinator(&ids, BarrierPolicy::FailRound, 3).await;

        let mut shuffled = states.clone();
        shuffled.shuffle(&mut rand::rng());

        for state in shuffled {
            let id = state.agent_id.clone();
            coordinator.submit(&id, state).await.unwrap();
        }

        let aggregate = coordinator.barrier("a", TIMEOUT).await.unwrap();
        let bits: Vec<u64> = aggregate.state.weights.iter().map(|w| w.to_bits()).collect();
        outputs.push(bits);
    }

    assert!(outputs.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test(flavor = "multi_thread")]
async fn dimension_mismatch_only_drops_the_offender_under_partial_round() {
    let coordinator = coordinator(&["a", "b", "c"], BarrierPolicy::PartialRound, 2).await;

    coordinator
        .submit("a", AgentState::new("a", vec![1., 1.], 1))
        .await
        .unwrap();

    let err = coordinator
        .submit("b", AgentState::new("b", vec![1., 1., 1.], 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SyncErr::DimensionMismatch {
            agent_id: "b".into(),
            expected: 2,
            got: 3
        }
    );

    coordinator
        .submit("c", AgentState::new("c", vec![3., 3.], 1))
        .await
        .unwrap();

    let aggregate = coordinator.barrier("a", TIMEOUT).await.unwrap();
    assert_eq!(aggregate.state.weights, vec![2., 2.]);
    assert_eq!(aggregate.report.outcome, RoundOutcome::Partial);
    assert_eq!(aggregate.report.excluded[0].agent_id, "b");
}

#[tokio::test(flavor = "multi_thread")]
async fn dimension_mismatch_fails_the_round_for_everyone_under_fail_round() {
    let coordinator = coordinator(&["a", "b", "c"], BarrierPolicy::FailRound, 2).await;

    coordinator
        .submit("a", AgentState::new("a", vec![1., 1.], 1))
        .await
        .unwrap();
    coordinator
        .submit("c", AgentState::new("c", vec![3., 3.], 1))
        .await
        .unwrap();
    let err = coordinator
        .submit("b", AgentState::new("b", vec![1.], 1))
        .await
        .unwrap_err();

    for id in ["a", "c"] {
        assert_eq!(coordinator.barrier(id, TIMEOUT).await.unwrap_err(), err);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn nan_contribution_is_isolated() {
    let coordinator = coordinator(&["a", "b", "c"], BarrierPolicy::FailRound, 2).await;

    let err = coordinator
        .submit("b", AgentState::new("b", vec![0., f64::NAN], 1))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        SyncErr::Corrupt {
            agent_id: "b".into(),
            index: 1
        }
    );

    let states = vec![
        AgentState::new("a", vec![1., 1.], 1),
        AgentState::new("c", vec![2., 2.], 1),
    ];
    let results = run_round(&coordinator, states, TIMEOUT).await;

    for (_, result) in results {
        let aggregate = result.unwrap();
        assert_eq!(aggregate.state.weights, vec![1.5, 1.5]);
        assert!(aggregate.state.weights.iter().all(|w| w.is_finite()));
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn withdrawn_agents_are_not_waited_for() {
    let coordinator = coordinator(&["a", "b"], BarrierPolicy::FailRound, 1).await;

    coordinator.withdraw("b").await.unwrap();
    coordinator
        .submit("a", AgentState::new("a", vec![7.], 1))
        .await
        .unwrap();

    let aggregate = coordinator.barrier("a", TIMEOUT).await.unwrap();
    assert_eq!(aggregate.state.weights, vec![7.]);
    assert_eq!(aggregate.state.iteration, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn calls_after_close_are_cancelled() {
    let coordinator = coordinator(&["a"], BarrierPolicy::FailRound, 1).await;

    coordinator.close().await;

    assert_eq!(coordinator.register("b").await.unwrap_err(), SyncErr::Cancelled);
    assert_eq!(
        coordinator
            .submit("a", AgentState::new("a", vec![1.], 1))
            .await
            .unwrap_err(),
        SyncErr::Cancelled
    );
    assert_eq!(coordinator.barrier("a", TIMEOUT).await.unwrap_err(), SyncErr::Cancelled);
}

#[tokio::test(flavor = "multi_thread")]
async fn sequence_must_grow_across_rounds() {
    let coordinator = coordinator(&["a"], BarrierPolicy::FailRound, 1).await;

    coordinator
        .submit("a", AgentState::new("a", vec![1.], 10))
        .await
        .unwrap();
    coordinator.barrier("a", TIMEOUT).await.unwrap();

    let err = coordinator
        .submit("a", AgentState::new("a", vec![1.], 3))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncErr::SequenceRegression { last: 10, got: 3, .. }));
}
