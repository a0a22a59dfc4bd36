use std::{num::NonZeroU64, time::Duration};

use agent::AgentConfig;
use comms::specs::{BackendSpec, FailurePolicy};
use coordinator::BarrierPolicy;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerErr};

/// The full description of a training run.
///
/// Every field is required, there are no defaults that could change how rounds are
/// resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingConfig {
    pub agent_ids: Vec<String>,
    /// The starting weights of every agent, their length fixes the run's dimensionality.
    pub initial_weights: Vec<f64>,
    pub iterations: u64,
    pub sync_interval: u64,
    pub round_timeout_ms: u64,
    pub barrier_policy: BarrierPolicy,
    pub learning_rate: f64,
    pub failure_policy: FailurePolicy,
    pub backend: BackendSpec,
}

impl TrainingConfig {
    /// Parses and validates a JSON configuration.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| TrainerErr::InvalidConfig(format!("malformed training config: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration before any agent starts.
    ///
    /// Duplicated agent ids aren't checked here, the coordinator refuses them at
    /// registration.
    pub fn validate(&self) -> Result<()> {
        if self.agent_ids.is_empty() {
            return Err(TrainerErr::InvalidConfig(
                "at least one agent id is required".into(),
            ));
        }

        if let Some(i) = self.agent_ids.iter().position(|id| id.is_empty()) {
            return Err(TrainerErr::InvalidConfig(format!(
                "agent_ids[{i}] is empty"
            )));
        }

        if self.initial_weights.is_empty() {
            return Err(TrainerErr::InvalidConfig(
                "initial_weights must have at least one element".into(),
            ));
        }

        if let Some(i) = self.initial_weights.iter().position(|w| !w.is_finite()) {
            return Err(TrainerErr::InvalidConfig(format!(
                "initial_weights[{i}] is not finite"
            )));
        }

        if self.sync_interval == 0 {
            return Err(TrainerErr::InvalidConfig(
                "sync_interval must be greater than 0".into(),
            ));
        }

        if self.round_timeout_ms == 0 {
            return Err(TrainerErr::InvalidConfig(
                "round_timeout_ms must be greater than 0".into(),
            ));
        }

        if !self.learning_rate.is_finite() || self.learning_rate <= 0. {
            return Err(TrainerErr::InvalidConfig(format!(
                "learning_rate ({}) must be a positive number",
                self.learning_rate
            )));
        }

        Ok(())
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_millis(self.round_timeout_ms)
    }

    /// The bounds every agent of the run trains with.
    pub(crate) fn agent_config(&self) -> Result<AgentConfig> {
        let sync_interval = NonZeroU64::new(self.sync_interval).ok_or_else(|| {
            TrainerErr::InvalidConfig("sync_interval must be greater than 0".into())
        })?;

        Ok(AgentConfig {
            iterations: self.iterations,
            sync_interval,
            learning_rate: self.learning_rate,
            round_timeout: self.round_timeout(),
            failure_policy: self.failure_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"{
        "agent_ids": ["a", "b"],
        "initial_weights": [0.0, 0.5],
        "iterations": 10,
        "sync_interval": 5,
        "round_timeout_ms": 1000,
        "barrier_policy": "partial_round",
        "learning_rate": 0.1,
        "failure_policy": "lenient",
        "backend": "local"
    }"#;

    fn valid() -> TrainingConfig {
        TrainingConfig::from_json(VALID).unwrap()
    }

    #[test]
    fn test_parse_valid_config() {
        let config = valid();

        assert_eq!(config.agent_ids, vec!["a", "b"]);
        assert_eq!(config.barrier_policy, BarrierPolicy::PartialRound);
        assert_eq!(config.backend, BackendSpec::Local);
        assert_eq!(config.round_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn test_missing_field_is_rejected() {
        let json = VALID.replace(r#""failure_policy": "lenient","#, "");

        assert!(matches!(
            TrainingConfig::from_json(&json),
            Err(TrainerErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_unknown_field_is_rejected() {
        let json = VALID.replace(r#""iterations": 10,"#, r#""iterations": 10, "seed": 3,"#);

        assert!(matches!(
            TrainingConfig::from_json(&json),
            Err(TrainerErr::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let cases: [fn(&mut TrainingConfig); 6] = [
            |c: &mut TrainingConfig| c.agent_ids.clear(),
            |c: &mut TrainingConfig| c.agent_ids.push(String::new()),
            |c: &mut TrainingConfig| c.initial_weights.clear(),
            |c: &mut TrainingConfig| c.initial_weights[1] = f64::NAN,
            |c: &mut TrainingConfig| c.sync_interval = 0,
            |c: &mut TrainingConfig| c.learning_rate = -0.1,
        ];

        for (i, mutate) in cases.iter().enumerate() {
            let mut config = valid();
            mutate(&mut config);
            assert!(config.validate().is_err(), "case {i} should be rejected");
        }
    }

    #[test]
    fn test_zero_iterations_are_valid() {
        let mut config = valid();
        config.iterations = 0;

        assert!(config.validate().is_ok());
    }
}
