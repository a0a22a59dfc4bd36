use std::time::Duration;

use agent_sync::{
    AgentState, BackendSpec, BarrierPolicy, DistributedTrainer, FailurePolicy,
    LocalSyncCoordinator, RoundOutcome, SyncCoordinator, TrainingConfig, TrainingResult,
};

const EPSILON: f64 = 1e-6;

fn quadratic(w: &[f64], _: u64) -> (f64, Vec<f64>) {
    let target = [5., 5.];
    let loss: f64 = w.iter().zip(target).map(|(w, t)| (w - t).powi(2)).sum();
    let gradient: Vec<f64> = w.iter().zip(target).map(|(w, t)| 2. * (w - t)).collect();
    (loss, gradient)
}

fn config(ids: &[&str], iterations: u64, sync_interval: u64) -> TrainingConfig {
    let _ = env_logger::builder().is_test(true).try_init();

    TrainingConfig {
        agent_ids: ids.iter().map(|id| id.to_string()).collect(),
        initial_weights: vec![0., 0.],
        iterations,
        sync_interval,
        round_timeout_ms: 5_000,
        barrier_policy: BarrierPolicy::PartialRound,
        learning_rate: 0.1,
        failure_policy: FailurePolicy::Lenient,
        backend: BackendSpec::Local,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn three_agents_average_to_the_mean() {
    let coordinator = LocalSyncCoordinator::new(BarrierPolicy::FailRound, 2);
    let states = [
        AgentState::new("a", vec![1., 1.], 1),
        AgentState::new("b", vec![3., 3.], 1),
        AgentState::new("c", vec![2., 2.], 1),
    ];

    for state in &states {
        coordinator.register(&state.agent_id).await.unwrap();
    }

    let mut waiters = Vec::new();
    for state in states {
        let coordinator = coordinator.clone();
        waiters.push(tokio::spawn(async move {
            let id = state.agent_id.clone();
            coordinator.submit(&id, state).await.unwrap();
            coordinator.barrier(&id, Duration::from_secs(5)).await.unwrap()
        }));
    }

    for waiter in waiters {
        assert_eq!(waiter.await.unwrap().state.weights, vec![2., 2.]);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn late_agent_is_missed_for_one_round() {
    let coordinator = LocalSyncCoordinator::new(BarrierPolicy::PartialRound, 2);
    for id in ["a", "b", "c"] {
        coordinator.register(id).await.unwrap();
    }

    coordinator
        .submit("a", AgentState::new("a", vec![0., 2.], 1))
        .await
        .unwrap();
    coordinator
        .submit("b", AgentState::new("b", vec![4., 6.], 1))
        .await
        .unwrap();

    let aggregate = coordinator
        .barrier("a", Duration::from_millis(100))
        .await
        .unwrap();

    assert_eq!(aggregate.state.weights, vec![2., 4.]);
    assert_eq!(aggregate.report.outcome, RoundOutcome::Partial);
    assert_eq!(aggregate.report.missed, vec!["c"]);

    let history = coordinator.history();
    assert_eq!(history.len(), 1);
    assert_eq!(coordinator.current_round(), 1);

    // Still registered, "c" takes part in the next round.
    coordinator
        .submit("c", AgentState::new("c", vec![1., 1.], 1))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn agents_converge_on_a_shared_quadratic() {
    let config = config(&["a", "b", "c"], 200, 10);

    let result = DistributedTrainer::new(config, quadratic)
        .unwrap()
        .run()
        .await
        .unwrap();

    assert_eq!(result.final_weights.len(), 3);
    assert_eq!(result.rounds.len(), 20);
    assert!(result.rounds.iter().all(|r| r.outcome == RoundOutcome::Success));

    let weights: Vec<&Vec<f64>> = result.final_weights.values().collect();
    for w in &weights {
        assert!(w.iter().all(|v| (v - 5.).abs() < EPSILON), "{w:?} is far from the target");
    }
    for pair in weights.windows(2) {
        for (x, y) in pair[0].iter().zip(pair[1]) {
            assert!((x - y).abs() < EPSILON);
        }
    }

    let trajectory = result.loss_trajectory();
    assert!(trajectory.last().unwrap() < trajectory.first().unwrap());
}

#[test]
fn agent_state_survives_encoding() {
    let state = AgentState::new("agent-0", vec![0.1, 0.2, 0.3], 7);

    let mut buf = Vec::new();
    state.encode(&mut buf);
    let decoded = AgentState::decode(&buf).unwrap();

    assert_eq!(decoded.weights, vec![0.1, 0.2, 0.3]);
    assert_eq!(decoded.iteration, 7);
}

#[tokio::test(flavor = "multi_thread")]
async fn result_json_is_exact() {
    let result = DistributedTrainer::new(config(&["a", "b"], 25, 10), quadratic)
        .unwrap()
        .run()
        .await
        .unwrap();

    let json = result.to_json().unwrap();
    let decoded = TrainingResult::from_json(&json).unwrap();

    assert_eq!(decoded, result);
}
