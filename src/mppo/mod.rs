//! World-model extension of PPO.
//!
//! [`WorldModelTrainer`] plugs into [`crate::ppo::Ppo`] as a
//! [`crate::ppo::TrainingAugmentation`].

pub mod replay_buffer;
pub mod trainer;
pub mod world_model;

pub use replay_buffer::{ReplayBuffer, Trajectories};
pub use trainer::{WorldModelConfig, WorldModelLosses, WorldModelTrainer};
pub use world_model::{GanDiscriminator, GanGenerator, GeneratedStep, SnLinear};
