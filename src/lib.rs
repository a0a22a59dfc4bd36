//! Synchronized training of independent agents.
//!
//! Agents train locally and every few steps meet at a barrier where a coordinator
//! replaces their weights with the elementwise mean of the round. The coordinator can
//! live in process, behind any async byte stream, or be provided by the caller.

pub use agent::{
    AgentConfig, AgentErr, AgentReport, AgentStatus, DistributedAgent, LossFn, SyncRecord,
};
pub use comms::{
    Aggregate, AgentState, MessageKind, Payload, Receipt, RoundOutcome, RoundReport, SyncErr,
    SyncMessage,
    specs::{BackendSpec, BarrierPolicy, FailurePolicy},
};
pub use coordinator::{
    Coordinator, LocalSyncCoordinator, MessagePassingCoordinator, SyncCoordinator, serve,
};
pub use tokio_util::sync::CancellationToken;
pub use trainer::{DistributedTrainer, RoundSummary, TrainerErr, TrainingConfig, TrainingResult};
