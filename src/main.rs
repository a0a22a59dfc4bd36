use std::{env, fs};

use agent_sync::{
    BackendSpec, Coordinator, DistributedTrainer, LocalSyncCoordinator, MessagePassingCoordinator,
    TrainingConfig, serve,
};
use anyhow::{Context, bail};
use log::{info, warn};
use serde::Deserialize;

/// A training run against a quadratic bowl centered at `target`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Demo {
    training: TrainingConfig,
    target: Vec<f64>,
}

fn quadratic(target: Vec<f64>) -> impl Fn(&[f64], u64) -> (f64, Vec<f64>) + Send + Sync + 'static {
    move |w: &[f64], _: u64| {
        let loss: f64 = w.iter().zip(&target).map(|(w, t)| (w - t).powi(2)).sum();
        let gradient: Vec<f64> = w.iter().zip(&target).map(|(w, t)| 2. * (w - t)).collect();
        (loss, gradient)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let Some(path) = env::args().nth(1) else {
        bail!("usage: agent-sync <demo.json>");
    };

    let json = fs::read_to_string(&path).with_context(|| format!("couldn't read {path}"))?;
    let demo: Demo = serde_json::from_str(&json).context("malformed demo file")?;

    if demo.target.len() != demo.training.initial_weights.len() {
        bail!(
            "target has {} elements but the weights have {}",
            demo.target.len(),
            demo.training.initial_weights.len()
        );
    }

    let backend = demo.training.backend;
    let policy = demo.training.barrier_policy;
    let dimension = demo.training.initial_weights.len();

    let mut trainer = DistributedTrainer::new(demo.training, quadratic(demo.target))?;

    match backend {
        BackendSpec::Local => {}
        BackendSpec::MessagePassing => {
            const BUF_SIZE: usize = 1 << 16;

            let (client, server) = tokio::io::duplex(BUF_SIZE);

            let (rx, tx) = tokio::io::split(server);
            let local = LocalSyncCoordinator::new(policy, dimension);
            tokio::spawn(async move {
                if let Err(e) = serve(local, rx, tx).await {
                    warn!("coordinator server failed: {e}");
                }
            });

            let (rx, tx) = tokio::io::split(client);
            let remote = MessagePassingCoordinator::connect(rx, tx);
            trainer = trainer.with_coordinator(Coordinator::MessagePassing(remote))?;
        }
        BackendSpec::Cluster => {
            bail!("cluster coordinators must be provided by the embedding application")
        }
    }

    let token = trainer.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupted, cancelling the run");
            token.cancel();
        }
    });

    let result = trainer.run().await?;
    println!("{}", result.to_json()?);

    Ok(())
}
