mod agent;
mod config;
pub mod error;
mod loss;
mod report;

pub use agent::DistributedAgent;
pub use config::AgentConfig;
pub use error::{AgentErr, GradientFault, Result};
pub use loss::LossFn;
pub use report::{AgentReport, AgentStatus, SyncRecord};
