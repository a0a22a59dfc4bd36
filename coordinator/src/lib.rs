mod coordinator;
mod local;
mod message_passing;

pub use comms::{
    Aggregate, AgentState, Receipt, RoundOutcome, RoundReport, SyncErr, specs::BarrierPolicy,
};
pub use coordinator::{Coordinator, SyncCoordinator};
pub use local::LocalSyncCoordinator;
pub use message_passing::{MessagePassingCoordinator, serve};

/// The result type of every coordinator operation.
pub type Result<T> = std::result::Result<T, SyncErr>;
