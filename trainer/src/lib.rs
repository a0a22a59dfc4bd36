mod config;
pub mod error;
mod result;
mod trainer;

pub use config::TrainingConfig;
pub use error::{Result, TrainerErr};
pub use result::{RoundSummary, TrainingResult};
pub use trainer::DistributedTrainer;
