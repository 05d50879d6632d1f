//! Proximal Policy Optimization on top of `burn`, with a model-based variant
//! (MPPO) that trains an adversarial latent world model from replayed
//! trajectories.
//!
//! The crate is organised the way the training loop runs:
//!
//! - [`burnrl::base`] holds the collaborator interfaces: vectorized
//!   environments, agents, metric loggers and observation/action spaces.
//! - [`ppo`] is the learner itself: sample collection, advantage estimation,
//!   the clipped-objective update and its schedules.
//! - [`mppo`] adds the replay buffer and the world-model trainer, plugged into
//!   the learner as a [`ppo::TrainingAugmentation`].
//! - [`trainer`] drives agents against environments, either one agent at a
//!   time or a whole population sharing a multiplayer environment.

pub mod burnrl;
pub mod error;
pub mod mppo;
pub mod ppo;
pub mod trainer;
mod utils;

pub use error::{ConfigError, PpoError};
