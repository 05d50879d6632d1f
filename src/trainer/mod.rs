//! Drivers that connect agents to vectorized environments.

mod env_trainer;
mod multiplayer;

pub use env_trainer::EnvTrainer;
pub use multiplayer::{MultiplayerTrainer, PopulationConfig};
