use std::{error::Error, fmt};

use comms::SyncErr;

/// The trainer module's result type.
pub type Result<T> = std::result::Result<T, TrainerErr>;

/// Failures that stop a training run.
#[derive(Debug)]
pub enum TrainerErr {
    /// Invalid configuration, caught before any agent starts.
    InvalidConfig(String),
    /// The coordinator refused an agent, the run is aborted.
    Registration(SyncErr),
    /// An agent task panicked or was aborted.
    AgentTask { agent_id: String, detail: String },
    Export(serde_json::Error),
}

impl fmt::Display for TrainerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
            Self::Registration(e) => write!(f, "registration failed: {e}"),
            Self::AgentTask { agent_id, detail } => {
                write!(f, "agent {agent_id} task failed: {detail}")
            }
            Self::Export(e) => write!(f, "result export failed: {e}"),
        }
    }
}

impl Error for TrainerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Registration(e) => Some(e),
            Self::Export(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TrainerErr {
    fn from(e: serde_json::Error) -> Self {
        Self::Export(e)
    }
}
